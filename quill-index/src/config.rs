use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub enabled: bool,

    /// Run the initial build and the filesystem watcher automatically
    /// on open. Off means the host drives `rebuild_index` and
    /// `apply_events` itself.
    pub auto_refresh: bool,

    /// Fraction of one core the maintenance loop may consume,
    /// evaluated in 100 ms slices.
    pub cpu_budget: f64,

    /// Max concurrent file refreshes during incremental updates.
    pub parallelism: usize,

    /// Exclusions on top of the built-in skipped-directory list.
    pub exclude_globs: Vec<String>,

    /// Debounce for coalescing change events into one refresh.
    pub refresh_debounce: Duration,

    /// Debounce for coalescing index writes to disk.
    pub persist_debounce: Duration,

    pub max_file_bytes: u64,
    pub snippet_chars: usize,
    pub overview_snippet_chars: usize,
    pub chunk_chars: usize,
    pub chunk_overlap_chars: usize,
    pub max_chunks_per_file: usize,
    pub max_terms_per_file: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_refresh: true,
            cpu_budget: 0.2,
            parallelism: 2,
            exclude_globs: Vec::new(),
            refresh_debounce: Duration::from_secs(3),
            persist_debounce: Duration::from_secs(5),
            max_file_bytes: 2 * 1024 * 1024,
            snippet_chars: 400,
            overview_snippet_chars: 1200,
            chunk_chars: 400,
            chunk_overlap_chars: 100,
            max_chunks_per_file: 32,
            max_terms_per_file: 2048,
        }
    }
}

impl IndexerConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(0.01..=1.0).contains(&self.cpu_budget) {
            return Err(format!("cpu_budget {} out of (0.01, 1.0]", self.cpu_budget));
        }
        if self.parallelism == 0 {
            return Err("parallelism must be at least 1".to_string());
        }
        if self.chunk_overlap_chars >= self.chunk_chars {
            return Err("chunk overlap must be smaller than the chunk size".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(IndexerConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_budget_and_overlap_are_rejected() {
        let mut config = IndexerConfig::default();
        config.cpu_budget = 0.0;
        assert!(config.validate().is_err());

        let mut config = IndexerConfig::default();
        config.chunk_overlap_chars = config.chunk_chars;
        assert!(config.validate().is_err());
    }
}
