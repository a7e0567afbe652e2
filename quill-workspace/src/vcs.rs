use futures::future::BoxFuture;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum GitStashMode {
    Off,
    #[default]
    DirtyOnly,
    Always,
}

/// Opaque handle to a stash commit created before an apply. Carries the
/// commit sha so the stash stays addressable even if the reflog index
/// shifts underneath us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashRef {
    pub sha: String,
    pub operation_id: String,
}

/// Version-control operations the apply engine relies on for its
/// last-resort rollback path. Failures here are reported but are never
/// allowed to fail a transaction on their own.
pub trait VcsService: Send + Sync {
    fn is_working_tree_dirty(&self) -> BoxFuture<'_, anyhow::Result<bool>>;
    fn stash<'a>(&'a self, operation_id: &'a str)
    -> BoxFuture<'a, anyhow::Result<Option<StashRef>>>;
    fn stash_pop<'a>(&'a self, reference: &'a StashRef) -> BoxFuture<'a, anyhow::Result<()>>;
    fn stash_drop<'a>(&'a self, reference: &'a StashRef) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Shells out to the `git` binary. `stash create`/`stash store` is used
/// instead of `stash push` so the working tree is left untouched while
/// the backup commit is still reachable from the stash reflog.
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn git(&self, args: &[&str]) -> anyhow::Result<std::process::Output> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .await?;
        Ok(output)
    }

    async fn stash_entry_name(&self, sha: &str) -> Option<String> {
        let output = self
            .git(&["stash", "list", "--format=%H %gd"])
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if let Some((entry_sha, name)) = line.split_once(' ')
                && entry_sha == sha
            {
                return Some(name.trim().to_string());
            }
        }
        None
    }
}

impl VcsService for GitCli {
    fn is_working_tree_dirty(&self) -> BoxFuture<'_, anyhow::Result<bool>> {
        Box::pin(async move {
            let output = self.git(&["status", "--porcelain"]).await?;
            if !output.status.success() {
                // Not a git repository; treat as clean.
                return Ok(false);
            }
            Ok(!output.stdout.is_empty())
        })
    }

    fn stash<'a>(
        &'a self,
        operation_id: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<StashRef>>> {
        Box::pin(async move {
            let message = format!("quill-apply:{operation_id}");
            let created = self.git(&["stash", "create", &message]).await?;
            if !created.status.success() {
                warn!("git stash create failed for {operation_id}");
                return Ok(None);
            }
            let sha = String::from_utf8_lossy(&created.stdout).trim().to_string();
            if sha.is_empty() {
                // Clean working tree: nothing to protect.
                return Ok(None);
            }
            let stored = self
                .git(&["stash", "store", "-m", &message, &sha])
                .await?;
            if !stored.status.success() {
                warn!("git stash store failed for {operation_id}; stash {sha} is unreachable");
            }
            Ok(Some(StashRef {
                sha,
                operation_id: operation_id.to_string(),
            }))
        })
    }

    fn stash_pop<'a>(&'a self, reference: &'a StashRef) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let output = self.git(&["stash", "apply", &reference.sha]).await?;
            if !output.status.success() {
                anyhow::bail!(
                    "git stash apply {} failed: {}",
                    reference.sha,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Ok(())
        })
    }

    fn stash_drop<'a>(&'a self, reference: &'a StashRef) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let Some(entry) = self.stash_entry_name(&reference.sha).await else {
                return Ok(());
            };
            let output = self.git(&["stash", "drop", &entry]).await?;
            if !output.status.success() {
                anyhow::bail!(
                    "git stash drop {entry} failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Ok(())
        })
    }
}

impl GitCli {
    /// Touched paths from `git status --porcelain`, used by consumers
    /// that want recency signals without their own git plumbing.
    pub async fn dirty_paths(&self) -> std::collections::HashSet<String> {
        let mut paths = std::collections::HashSet::new();
        let Ok(output) = self.git(&["status", "--porcelain"]).await else {
            return paths;
        };
        if !output.status.success() {
            return paths;
        }
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if line.len() < 4 {
                continue;
            }
            let path_part = line[3..].trim();
            let path = match path_part.find(" -> ") {
                Some(idx) => &path_part[idx + 4..],
                None => path_part,
            };
            if !path.is_empty() {
                paths.insert(path.replace('\\', "/"));
            }
        }
        paths
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
