//! Local text embeddings for the code index.
//!
//! Vectors are produced in-process through fastembed (ONNX runtime), so
//! enabling embeddings never ships workspace content anywhere. Callers
//! still gate every embed behind the offline/privacy predicate and run
//! text through secret redaction first; this crate only turns sanitized
//! text into opaque dense vectors of a fixed dimension.

mod error;
mod service;

pub use error::EmbeddingError;
pub use service::EmbeddingConfig;
pub use service::EmbeddingModelKind;
pub use service::EmbeddingService;

/// Dimension of the default code-oriented model.
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
