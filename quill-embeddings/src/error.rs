use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding model failed to initialize: {0}")]
    ModelInit(String),

    #[error("embedding generation failed: {0}")]
    Generation(String),

    #[error("embedding request was cancelled")]
    Cancelled,

    #[error("embedding service is disabled")]
    Disabled,
}

impl From<fastembed::Error> for EmbeddingError {
    fn from(err: fastembed::Error) -> Self {
        EmbeddingError::Generation(err.to_string())
    }
}
