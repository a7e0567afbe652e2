use serde::Deserialize;
use serde::Serialize;

/// Failure classification reported in a [`crate::TransactionOutcome`].
/// Input and write-phase problems are `write_failure`; a base hash that
/// moved between capture and write is `base_mismatch`; a text edit that
/// cannot be spliced is `hunk_apply_failure`; a post-apply hash that
/// disagrees with the expected hash is `verification_failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    BaseMismatch,
    HunkApplyFailure,
    WriteFailure,
    VerificationFailure,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorCategory::BaseMismatch => "base_mismatch",
            ErrorCategory::HunkApplyFailure => "hunk_apply_failure",
            ErrorCategory::WriteFailure => "write_failure",
            ErrorCategory::VerificationFailure => "verification_failure",
        };
        f.write_str(label)
    }
}
