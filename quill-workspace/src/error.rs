use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("path {path:?} is outside the workspace root {root:?}")]
    OutsideWorkspace { path: PathBuf, root: PathBuf },

    #[error("unsupported uri scheme in {0:?}")]
    UnsupportedScheme(String),

    #[error("empty uri")]
    EmptyUri,

    #[error("invalid {field}: expected a positive integer, got {value}")]
    InvalidInteger { field: &'static str, value: i64 },

    #[error("workspace root {0:?} does not exist")]
    MissingRoot(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;
