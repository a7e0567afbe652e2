use quill_workspace::BufferRegistry;
use quill_workspace::FileSystemService;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::warn;
use uuid::Uuid;

/// Pre-apply capture of one touched file. `content_before_apply` is
/// `None` when the file did not exist (a create); restoring such an
/// entry deletes the file again.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    pub path: PathBuf,
    pub content_before_apply: Option<String>,
    pub was_dirty: bool,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: Uuid,
    pub created_at: SystemTime,
    pub files: Vec<SnapshotFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Created(Uuid),
    /// Capture would exceed the configured byte ceiling; the engine
    /// falls back to the stash for rollback.
    Skipped {
        requested_bytes: u64,
        limit: u64,
    },
    Disabled,
}

/// In-memory store of rollback snapshots. Snapshots live from apply
/// start to commit or rollback and are not persisted; a crash mid
/// transaction is recovered through the audit log and stash instead.
pub struct SnapshotStore {
    enabled: bool,
    max_total_bytes: u64,
    fs: Arc<dyn FileSystemService>,
    buffers: Arc<dyn BufferRegistry>,
    snapshots: std::sync::Mutex<HashMap<Uuid, Snapshot>>,
}

impl SnapshotStore {
    pub fn new(
        enabled: bool,
        max_total_bytes: u64,
        fs: Arc<dyn FileSystemService>,
        buffers: Arc<dyn BufferRegistry>,
    ) -> Self {
        Self {
            enabled,
            max_total_bytes,
            fs,
            buffers,
            snapshots: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Store the already-captured base contents as a snapshot, subject
    /// to the byte ceiling. Capture happens in the engine's base-capture
    /// step so buffer and disk are read exactly once per transaction.
    pub fn create_snapshot(&self, files: Vec<SnapshotFile>) -> SnapshotOutcome {
        if !self.enabled {
            return SnapshotOutcome::Disabled;
        }
        let requested_bytes: u64 = files
            .iter()
            .filter_map(|file| file.content_before_apply.as_ref())
            .map(|content| content.len() as u64)
            .sum();
        if requested_bytes > self.max_total_bytes {
            return SnapshotOutcome::Skipped {
                requested_bytes,
                limit: self.max_total_bytes,
            };
        }
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            created_at: SystemTime::now(),
            files,
        };
        let id = snapshot.id;
        self.lock().insert(id, snapshot);
        SnapshotOutcome::Created(id)
    }

    /// Write every captured file back to the buffer (when one is still
    /// resolvable) and to disk. Returns false when any file could not be
    /// restored; restoration continues past individual failures so the
    /// tree is left as close to the base state as possible.
    pub async fn restore_snapshot(&self, id: Uuid) -> bool {
        let Some(snapshot) = self.lock().remove(&id) else {
            warn!("restore requested for unknown snapshot {id}");
            return false;
        };
        let mut all_ok = true;
        for file in &snapshot.files {
            match &file.content_before_apply {
                Some(content) => {
                    if let Some(model) = self.buffers.resolve_model(&file.path)
                        && !model.is_disposed()
                    {
                        model.set_value(content);
                    }
                    if let Err(err) = self.fs.write_file(&file.path, content.as_bytes()).await {
                        warn!("failed to restore {:?}: {err}", file.path);
                        all_ok = false;
                    }
                }
                None => {
                    if self.fs.exists(&file.path).await
                        && let Err(err) = self.fs.delete(&file.path, false).await
                    {
                        warn!("failed to remove created file {:?}: {err}", file.path);
                        all_ok = false;
                    }
                }
            }
        }
        all_ok
    }

    pub fn discard_snapshot(&self, id: Uuid) {
        self.lock().remove(&id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Snapshot>> {
        match self.snapshots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
