//! Pure validators for tool parameters. Every edit/read tool funnels
//! its externally supplied arguments through these before touching the
//! filesystem.

use crate::error::Result;
use crate::error::WorkspaceError;

/// Validate a 1-based line or column number supplied by a tool call.
pub fn validate_positive_int(value: i64, field: &'static str) -> Result<u32> {
    if value < 1 || value > u32::MAX as i64 {
        return Err(WorkspaceError::InvalidInteger { field, value });
    }
    Ok(value as u32)
}

/// Booleans arrive as optional JSON values; missing means the default.
pub fn validate_bool(value: Option<bool>, default: bool) -> bool {
    value.unwrap_or(default)
}

/// Page numbers are clamped into `[1, max_pages]`; anything absent or
/// non-positive falls back to the first page.
pub fn validate_page(value: Option<i64>, max_pages: u32) -> u32 {
    let max = max_pages.max(1);
    match value {
        Some(raw) if raw >= 1 => (raw.min(max as i64)) as u32,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn positive_int_accepts_one_based_values() {
        assert_eq!(validate_positive_int(1, "line").expect("valid"), 1);
        assert_eq!(validate_positive_int(4096, "column").expect("valid"), 4096);
    }

    #[test]
    fn positive_int_rejects_zero_and_negatives() {
        assert!(validate_positive_int(0, "line").is_err());
        assert!(validate_positive_int(-7, "line").is_err());
        assert!(validate_positive_int(i64::MAX, "line").is_err());
    }

    #[test]
    fn bool_falls_back_to_default() {
        assert!(validate_bool(None, true));
        assert!(!validate_bool(Some(false), true));
    }

    #[test]
    fn page_is_clamped_into_bounds() {
        assert_eq!(validate_page(None, 10), 1);
        assert_eq!(validate_page(Some(0), 10), 1);
        assert_eq!(validate_page(Some(3), 10), 3);
        assert_eq!(validate_page(Some(99), 10), 10);
        assert_eq!(validate_page(Some(2), 0), 1);
    }
}
