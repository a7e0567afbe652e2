//! Persistent hybrid code index.
//!
//! The builder walks the workspace and turns each eligible file into an
//! [`IndexEntry`]: symbols, imports, a citation snippet, chunked text
//! with per-chunk token sets, BM25 term caches and (optionally)
//! embeddings. The store keeps entries plus the inverted indexes and a
//! compacted JSON blob on disk. The maintenance coordinator watches the
//! filesystem and keeps everything fresh under a CPU budget.

mod builder;
mod chunker;
mod config;
mod error;
mod filter;
mod maintenance;
mod model;
mod store;
mod symbols;
mod tokenize;

pub use builder::DocumentSymbolProvider;
pub use builder::IndexBuilder;
pub use builder::SkipReason;
pub use builder::SkippedFile;
pub use chunker::ChunkDraft;
pub use chunker::chunk_content;
pub use config::IndexerConfig;
pub use error::IndexError;
pub use error::Result;
pub use filter::PathFilter;
pub use maintenance::IndexCoordinator;
pub use maintenance::IndexState;
pub use maintenance::IndexStatus;
pub use model::EntryId;
pub use model::IndexChunk;
pub use model::IndexEntry;
pub use model::InvertedIndexes;
pub use store::IndexStore;
pub use symbols::extract_symbols;
pub use tokenize::term_frequencies;
pub use tokenize::token_set;
pub use tokenize::tokenize;
