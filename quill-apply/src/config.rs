use quill_workspace::GitStashMode;
use serde::Deserialize;
use serde::Serialize;

const DEFAULT_SNAPSHOT_MAX_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyConfig {
    /// Ceiling for the total bytes captured by a rollback snapshot.
    /// When a transaction would exceed it the snapshot is skipped and
    /// rollback relies on the stash fallback.
    pub snapshot_max_bytes: u64,

    /// Whether snapshotting is enabled at all.
    pub snapshot_enabled: bool,

    pub git_auto_stash_mode: GitStashMode,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            snapshot_max_bytes: DEFAULT_SNAPSHOT_MAX_BYTES,
            snapshot_enabled: true,
            git_auto_stash_mode: GitStashMode::default(),
        }
    }
}
