use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("walk error: {0}")]
    Walk(String),

    #[error("workspace error: {0}")]
    Workspace(#[from] quill_workspace::WorkspaceError),

    #[error("embedding error: {0}")]
    Embedding(#[from] quill_embeddings::EmbeddingError),

    #[error("vector store error: {0}")]
    Vectors(#[from] quill_vectors::VectorStoreError),

    #[error("indexer is disabled")]
    Disabled,
}

impl From<ignore::Error> for IndexError {
    fn from(err: ignore::Error) -> Self {
        IndexError::Walk(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
