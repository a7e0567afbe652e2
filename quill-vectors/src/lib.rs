//! Dedicated vector store for chunk embeddings.
//!
//! Optional sidecar to the inverted index: when present, the query
//! engine pulls its cosine top-k as additional candidates for the
//! hybrid blend. Vectors are opaque dense arrays of one fixed
//! dimension; the store never talks to an embedding model itself.

mod store;

pub use store::VectorHit;
pub use store::VectorRecord;
pub use store::VectorStore;
pub use store::VectorStoreError;
pub use store::cosine_similarity;
