use crate::error::Result;
use globset::Glob;
use globset::GlobSet;
use globset::GlobSetBuilder;
use std::path::Component;
use std::path::Path;

/// Directories never worth indexing: VCS metadata, dependency caches,
/// build outputs and tool caches.
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".cache",
    ".idea",
    ".next",
    ".turbo",
    ".venv",
    "__pycache__",
    "build",
    "coverage",
    "dist",
    "node_modules",
    "out",
    "target",
    "vendor",
    "venv",
];

const CODE_EXTENSIONS: &[&str] = &[
    "c", "cc", "cpp", "cs", "go", "h", "hpp", "java", "js", "jsx", "kt", "php", "py", "rb", "rs",
    "scala", "sh", "swift", "ts", "tsx",
];

const OVERVIEW_DOCS: &[&str] = &[
    "README.md",
    "README",
    "ARCHITECTURE.md",
    "CONTRIBUTING.md",
    "AGENTS.md",
];

/// Combines the built-in skip list with user-supplied exclude globs.
pub struct PathFilter {
    excludes: GlobSet,
}

impl PathFilter {
    pub fn new(exclude_globs: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for glob in exclude_globs {
            builder.add(
                Glob::new(glob).map_err(|err| crate::error::IndexError::Walk(err.to_string()))?,
            );
        }
        let excludes = builder
            .build()
            .map_err(|err| crate::error::IndexError::Walk(err.to_string()))?;
        Ok(Self { excludes })
    }

    /// Whether a workspace-relative path should be skipped entirely.
    pub fn is_ignored(&self, rel: &Path) -> bool {
        let skipped_component = rel.components().any(|component| match component {
            Component::Normal(name) => name
                .to_str()
                .is_some_and(|value| SKIPPED_DIRS.contains(&value)),
            _ => false,
        });
        skipped_component || self.excludes.is_match(rel)
    }

    /// Whether a (non-ignored) file is worth indexing at all.
    pub fn is_eligible_file(&self, rel: &Path) -> bool {
        if self.is_ignored(rel) {
            return false;
        }
        if Self::is_overview_doc(rel) {
            return true;
        }
        rel.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| CODE_EXTENSIONS.contains(&ext))
    }

    pub fn is_overview_doc(rel: &Path) -> bool {
        rel.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| OVERVIEW_DOCS.iter().any(|doc| doc.eq_ignore_ascii_case(name)))
    }
}
