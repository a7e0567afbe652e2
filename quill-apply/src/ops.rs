use crate::text_edits::TextEdit;
use serde::Deserialize;
use serde::Serialize;

/// One model-produced file operation. For `Edit`, exactly one of
/// `content` (full replacement) and `text_edits` (ranged splices) is
/// present; the engine rejects anything else before touching disk.
#[derive(Debug, Clone)]
pub enum FileEditOperation {
    Create {
        uri: String,
        content: String,
    },
    Edit {
        uri: String,
        content: Option<String>,
        text_edits: Option<Vec<TextEdit>>,
    },
    Delete {
        uri: String,
        recursive: bool,
        is_folder: bool,
    },
}

impl FileEditOperation {
    pub fn uri(&self) -> &str {
        match self {
            FileEditOperation::Create { uri, .. }
            | FileEditOperation::Edit { uri, .. }
            | FileEditOperation::Delete { uri, .. } => uri,
        }
    }

    pub fn full_edit(uri: impl Into<String>, content: impl Into<String>) -> Self {
        FileEditOperation::Edit {
            uri: uri.into(),
            content: Some(content.into()),
            text_edits: None,
        }
    }

    pub fn ranged_edit(uri: impl Into<String>, edits: Vec<TextEdit>) -> Self {
        FileEditOperation::Edit {
            uri: uri.into(),
            content: None,
            text_edits: Some(edits),
        }
    }
}

/// Pre-apply identity of a file: the normalized content hash plus
/// whether content came from a dirty editor buffer rather than disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBaseSignature {
    pub uri: String,
    pub content_hash: String,
    pub is_dirty: bool,
}

/// Hash the file must have after the operation is applied; computed
/// before any write from the base plus the operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedFileResult {
    pub uri: String,
    pub expected_content_hash: String,
}
