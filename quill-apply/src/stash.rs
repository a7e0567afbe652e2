use quill_workspace::GitStashMode;
use quill_workspace::StashRef;
use quill_workspace::VcsService;
use std::sync::Arc;
use tracing::warn;

/// Auto-stash policy wrapper. In `dirty-only` mode a clean tree skips
/// the stash; `always` delegates unconditionally (git itself produces
/// nothing on a clean tree). The stash is kept after a successful apply
/// as a last-resort recovery point and is never auto-dropped.
pub struct AutoStash {
    mode: GitStashMode,
    vcs: Arc<dyn VcsService>,
}

impl AutoStash {
    pub fn new(mode: GitStashMode, vcs: Arc<dyn VcsService>) -> Self {
        Self { mode, vcs }
    }

    pub fn mode(&self) -> GitStashMode {
        self.mode
    }

    pub async fn create_stash(&self, operation_id: &str) -> Option<StashRef> {
        match self.mode {
            GitStashMode::Off => None,
            GitStashMode::DirtyOnly => {
                let dirty = match self.vcs.is_working_tree_dirty().await {
                    Ok(dirty) => dirty,
                    Err(err) => {
                        warn!("working tree status check failed: {err:?}");
                        return None;
                    }
                };
                if !dirty {
                    return None;
                }
                self.try_stash(operation_id).await
            }
            GitStashMode::Always => self.try_stash(operation_id).await,
        }
    }

    pub async fn restore_stash(&self, reference: &StashRef) -> bool {
        match self.vcs.stash_pop(reference).await {
            Ok(()) => true,
            Err(err) => {
                warn!("stash restore failed for {}: {err:?}", reference.sha);
                false
            }
        }
    }

    pub async fn drop_stash(&self, reference: &StashRef) {
        if let Err(err) = self.vcs.stash_drop(reference).await {
            warn!("stash drop failed for {}: {err:?}", reference.sha);
        }
    }

    async fn try_stash(&self, operation_id: &str) -> Option<StashRef> {
        match self.vcs.stash(operation_id).await {
            Ok(reference) => reference,
            Err(err) => {
                warn!("auto-stash failed for {operation_id}: {err:?}");
                None
            }
        }
    }
}
