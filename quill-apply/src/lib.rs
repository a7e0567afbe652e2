//! Atomic, verifying multi-file mutation engine.
//!
//! A transaction takes a batch of model-produced file operations and
//! applies them with pre/post content-hash verification, an in-memory
//! rollback snapshot and an optional git auto-stash as last-resort
//! fallback. On any failure every targeted file is restored to its
//! pre-call content; the caller always receives a structured
//! [`TransactionOutcome`] rather than an error.

mod audit;
mod config;
mod error;
mod hash;
mod ops;
mod snapshot;
mod stash;
mod text_edits;
mod transaction;

pub use audit::AuditAction;
pub use audit::AuditEvent;
pub use audit::AuditLog;
pub use config::ApplyConfig;
pub use error::ErrorCategory;
pub use hash::normalize_line_endings;
pub use hash::normalized_sha256;
pub use ops::ExpectedFileResult;
pub use ops::FileBaseSignature;
pub use ops::FileEditOperation;
pub use snapshot::Snapshot;
pub use snapshot::SnapshotFile;
pub use snapshot::SnapshotOutcome;
pub use snapshot::SnapshotStore;
pub use stash::AutoStash;
pub use text_edits::EditRange;
pub use text_edits::TextEdit;
pub use text_edits::apply_text_edits;
pub use transaction::ApplyEngine;
pub use transaction::ApplyOptions;
pub use transaction::TransactionOutcome;
