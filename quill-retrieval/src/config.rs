use serde::Deserialize;
use serde::Serialize;

/// Blend weights for the hybrid stage; expected to sum to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HybridWeights {
    pub bm25: f32,
    pub vector: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            bm25: 0.6,
            vector: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Hard deadline for one query; on expiry the best partial result
    /// set is returned with `timed_out` set.
    pub query_timeout_ms: u64,

    pub cache_capacity: usize,
    pub cache_ttl_ms: u64,

    /// Multi-token candidate intersection widens to a union below this
    /// many candidates.
    pub widen_threshold: usize,

    /// Entry-level composite score a file must reach before its chunks
    /// are scored individually.
    pub chunk_gate_score: f32,

    /// Candidates kept for the BM25 rerank stage.
    pub rerank_pool: usize,

    /// Stop scoring after this many candidates pass
    /// `high_score_threshold`.
    pub early_termination_count: usize,
    pub high_score_threshold: f32,

    pub hybrid_weights: HybridWeights,

    /// Deadline re-checks happen every this many candidates.
    pub deadline_check_interval: usize,

    /// Rolling latency window driving the degraded-mode switch.
    pub latency_window: usize,
    pub degraded_latency_ceiling_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 150,
            cache_capacity: 64,
            cache_ttl_ms: 30_000,
            widen_threshold: 16,
            chunk_gate_score: 2.0,
            rerank_pool: 128,
            early_termination_count: 24,
            high_score_threshold: 80.0,
            hybrid_weights: HybridWeights::default(),
            deadline_check_interval: 64,
            latency_window: 32,
            degraded_latency_ceiling_ms: 400,
        }
    }
}
