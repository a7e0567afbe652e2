//! Host abstractions shared by the apply engine and the repo indexer.
//!
//! This crate owns everything both subsystems consume from the editor
//! host: the workspace context (path safety), the filesystem service,
//! the editor-buffer registry, tool-parameter validation, secret
//! detection, the offline/privacy gate and the VCS service. None of the
//! heavy machinery lives here; the point is that external input is
//! sanitized in exactly one place.

mod buffers;
mod context;
mod error;
mod fs;
mod privacy;
mod secrets;
mod validate;
mod vcs;

pub use buffers::BufferRegistry;
pub use buffers::InMemoryBuffers;
pub use buffers::TextModel;
pub use context::WorkspaceContext;
pub use error::Result;
pub use error::WorkspaceError;
pub use fs::FileChangeKind;
pub use fs::FileChangeSet;
pub use fs::FileStat;
pub use fs::FileSystemService;
pub use fs::LocalFileSystem;
pub use privacy::PrivacyGate;
pub use secrets::SecretDetectionConfig;
pub use secrets::SecretDetector;
pub use secrets::SecretMatch;
pub use secrets::SecretMode;
pub use secrets::SecretScan;
pub use validate::validate_bool;
pub use validate::validate_page;
pub use validate::validate_positive_int;
pub use vcs::GitCli;
pub use vcs::GitStashMode;
pub use vcs::StashRef;
pub use vcs::VcsService;
