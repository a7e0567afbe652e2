//! Query engine over the hybrid code index.
//!
//! A query flows cache → candidate selection → composite scoring →
//! BM25 rerank → optional hybrid blend with embeddings → per-file
//! dedup → top-k, under a hard wall-clock deadline. Timeouts and early
//! termination are not errors; they are flags in [`QueryMetrics`]. A
//! sustained latency regression flips the engine into a degraded mode
//! that serves a recency fallback until the next full rebuild.

mod bm25;
mod cache;
mod config;
mod engine;
mod result;

pub use bm25::Bm25Params;
pub use bm25::bm25_score;
pub use cache::QueryCache;
pub use config::HybridWeights;
pub use config::RetrievalConfig;
pub use engine::QueryEngine;
pub use result::QueryHit;
pub use result::QueryMetrics;
