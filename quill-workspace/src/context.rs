use crate::error::Result;
use crate::error::WorkspaceError;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

/// Identity of one open workspace: the root folder plus the
/// per-workspace storage directory used for persisted state (index
/// blob, audit log, query cache).
#[derive(Debug, Clone)]
pub struct WorkspaceContext {
    root: PathBuf,
    folder_name: String,
    storage_dir: PathBuf,
}

impl WorkspaceContext {
    pub fn new(root: impl Into<PathBuf>, storage_dir: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(WorkspaceError::MissingRoot(root));
        }
        let root = normalize(&root);
        let folder_name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            root,
            folder_name,
            storage_dir: storage_dir.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Resolve an externally supplied uri to an absolute path inside the
    /// workspace. Accepts absolute paths, workspace-relative paths and
    /// `file://` uris. Relative paths that start with the workspace
    /// folder name are treated as workspace-relative with the duplicated
    /// folder segment stripped, a frequent model mistake. Anything that
    /// normalizes to a location outside the root is rejected.
    pub fn resolve(&self, uri: &str) -> Result<PathBuf> {
        let trimmed = uri.trim();
        if trimmed.is_empty() {
            return Err(WorkspaceError::EmptyUri);
        }
        let raw = if let Some((scheme, rest)) = trimmed.split_once("://") {
            if scheme != "file" {
                return Err(WorkspaceError::UnsupportedScheme(trimmed.to_string()));
            }
            rest
        } else {
            trimmed
        };

        let candidate = PathBuf::from(raw);
        let joined = if candidate.is_absolute() {
            candidate
        } else {
            let stripped = self.strip_duplicated_folder(&candidate);
            self.root.join(stripped)
        };
        let normalized = normalize(&joined);
        if !normalized.starts_with(&self.root) {
            return Err(WorkspaceError::OutsideWorkspace {
                path: normalized,
                root: self.root.clone(),
            });
        }
        Ok(normalized)
    }

    /// Workspace-relative display form with forward slashes.
    pub fn relative_display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    pub fn contains(&self, path: &Path) -> bool {
        normalize(path).starts_with(&self.root)
    }

    fn strip_duplicated_folder<'a>(&self, candidate: &'a Path) -> &'a Path {
        if self.folder_name.is_empty() {
            return candidate;
        }
        let mut components = candidate.components();
        match components.next() {
            Some(Component::Normal(first)) if first.to_string_lossy() == self.folder_name => {
                let rest = components.as_path();
                if rest.as_os_str().is_empty() || self.root.join(candidate).exists() {
                    candidate
                } else {
                    rest
                }
            }
            _ => candidate,
        }
    }
}

/// Lexically normalize a path: resolve `.` and `..` without touching the
/// filesystem, so traversal is caught even for paths that do not exist
/// yet.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn context() -> (WorkspaceContext, TempDir) {
        let temp = TempDir::new().expect("tempdir");
        let ctx = WorkspaceContext::new(temp.path(), temp.path().join(".quill"))
            .expect("workspace context");
        (ctx, temp)
    }

    #[test]
    fn resolves_relative_paths_against_root() {
        let (ctx, temp) = context();
        let resolved = ctx.resolve("src/main.rs").expect("resolve");
        assert_eq!(resolved, normalize(&temp.path().join("src/main.rs")));
    }

    #[test]
    fn accepts_file_scheme_uris() {
        let (ctx, temp) = context();
        let uri = format!("file://{}/src/lib.rs", temp.path().display());
        let resolved = ctx.resolve(&uri).expect("resolve");
        assert!(resolved.starts_with(temp.path()));
    }

    #[test]
    fn rejects_paths_escaping_the_root() {
        let (ctx, _temp) = context();
        assert!(matches!(
            ctx.resolve("../outside.txt"),
            Err(WorkspaceError::OutsideWorkspace { .. })
        ));
        assert!(matches!(
            ctx.resolve("src/../../outside.txt"),
            Err(WorkspaceError::OutsideWorkspace { .. })
        ));
    }

    #[test]
    fn rejects_absolute_paths_outside_the_root() {
        let (ctx, _temp) = context();
        assert!(matches!(
            ctx.resolve("/outside/x.txt"),
            Err(WorkspaceError::OutsideWorkspace { .. })
        ));
    }

    #[test]
    fn rejects_non_file_schemes() {
        let (ctx, _temp) = context();
        assert!(matches!(
            ctx.resolve("https://example.com/a.rs"),
            Err(WorkspaceError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn strips_duplicated_workspace_folder_prefix() {
        let (ctx, temp) = context();
        let folder = temp
            .path()
            .file_name()
            .expect("folder name")
            .to_string_lossy()
            .into_owned();
        let resolved = ctx
            .resolve(&format!("{folder}/src/main.rs"))
            .expect("resolve");
        assert_eq!(resolved, normalize(&temp.path().join("src/main.rs")));
    }

    #[test]
    fn keeps_prefix_when_a_real_subfolder_shares_the_name() {
        let (ctx, temp) = context();
        let folder = temp
            .path()
            .file_name()
            .expect("folder name")
            .to_string_lossy()
            .into_owned();
        std::fs::create_dir_all(temp.path().join(&folder)).expect("mkdir");
        std::fs::write(temp.path().join(&folder).join("real.txt"), "x").expect("write");
        let resolved = ctx
            .resolve(&format!("{folder}/real.txt"))
            .expect("resolve");
        assert_eq!(resolved, normalize(&temp.path().join(&folder).join("real.txt")));
    }

    #[test]
    fn relative_display_uses_forward_slashes() {
        let (ctx, temp) = context();
        let abs = temp.path().join("src").join("a.rs");
        assert_eq!(ctx.relative_display(&abs), "src/a.rs");
    }
}
