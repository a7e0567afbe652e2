use serde::Serialize;

/// One retrieval result: a file, optionally narrowed to the chunk that
/// carried the score, for citation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub uri: String,
    pub score: f32,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryMetrics {
    pub retrieval_latency_ms: u64,
    /// Estimated tokens the results would inject into model context.
    pub tokens_injected: usize,
    pub results_count: usize,
    pub top_score: Option<f32>,
    pub timed_out: bool,
    pub early_terminated: bool,
    pub embedding_latency_ms: Option<u64>,
    pub hybrid_search_used: bool,
    pub cache_hit: bool,
    pub degraded: bool,
}
