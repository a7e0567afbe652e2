use thiserror::Error;

/// A range in a text document. Lines and columns are 1-indexed; the end
/// column is exclusive (half-open), so a zero-width range has
/// `start == end`. An end column past the line length is clamped to the
/// end of the line, matching the host editor's splice semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditRange {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl EditRange {
    fn start(&self) -> (u32, u32) {
        (self.start_line, self.start_column)
    }

    fn end(&self) -> (u32, u32) {
        (self.end_line, self.end_column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub range: EditRange,
    pub text: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextEditError {
    #[error("edit range is inverted: {0:?}")]
    InvertedRange(EditRange),

    #[error("line or column index is zero in {0:?}")]
    ZeroIndex(EditRange),

    #[error("edit starts at line {line} but the document has {line_count} lines")]
    LineOutOfBounds { line: u32, line_count: usize },

    #[error("edits overlap at line {line}")]
    Overlap { line: u32 },
}

/// Splice a batch of text edits into `content`. Edits are validated for
/// non-overlap, then applied in descending start order so earlier edits
/// never shift the coordinates of later ones. Multi-line replacement
/// text is spliced across the affected line range.
pub fn apply_text_edits(content: &str, edits: &[TextEdit]) -> Result<String, TextEditError> {
    if edits.is_empty() {
        return Ok(content.to_string());
    }

    let mut ordered: Vec<&TextEdit> = edits.iter().collect();
    ordered.sort_by_key(|edit| edit.range.start());
    for edit in &ordered {
        let range = edit.range;
        if range.start_line == 0 || range.start_column == 0 || range.end_line == 0
            || range.end_column == 0
        {
            return Err(TextEditError::ZeroIndex(range));
        }
        if range.start() > range.end() {
            return Err(TextEditError::InvertedRange(range));
        }
    }
    for pair in ordered.windows(2) {
        // Half-open end columns: an edit ending exactly where the next
        // starts does not overlap.
        if pair[0].range.end() > pair[1].range.start() {
            return Err(TextEditError::Overlap {
                line: pair[1].range.start_line,
            });
        }
    }

    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    for edit in ordered.iter().rev() {
        splice(&mut lines, edit)?;
    }
    Ok(lines.join("\n"))
}

fn splice(lines: &mut Vec<String>, edit: &TextEdit) -> Result<(), TextEditError> {
    let range = edit.range;
    let line_count = lines.len();
    let start_idx = (range.start_line - 1) as usize;
    let end_idx = (range.end_line - 1) as usize;
    if start_idx >= line_count || end_idx >= line_count {
        return Err(TextEditError::LineOutOfBounds {
            line: range.start_line.max(range.end_line),
            line_count,
        });
    }

    let start_byte = byte_for_column(&lines[start_idx], range.start_column);
    let end_byte = byte_for_column(&lines[end_idx], range.end_column);
    let prefix = lines[start_idx][..start_byte].to_string();
    let suffix = lines[end_idx][end_byte..].to_string();

    let mut replacement: Vec<String> = Vec::new();
    let mut pieces = edit.text.split('\n');
    let first = pieces.next().unwrap_or_default();
    replacement.push(format!("{prefix}{first}"));
    for piece in pieces {
        replacement.push(piece.to_string());
    }
    if let Some(last) = replacement.last_mut() {
        last.push_str(&suffix);
    }

    lines.splice(start_idx..=end_idx, replacement);
    Ok(())
}

/// Byte offset of a 1-based character column, clamped to the line end.
fn byte_for_column(line: &str, column: u32) -> usize {
    let target = (column - 1) as usize;
    line.char_indices()
        .nth(target)
        .map(|(idx, _)| idx)
        .unwrap_or(line.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn edit(range: (u32, u32, u32, u32), text: &str) -> TextEdit {
        TextEdit {
            range: EditRange {
                start_line: range.0,
                start_column: range.1,
                end_line: range.2,
                end_column: range.3,
            },
            text: text.to_string(),
        }
    }

    #[test]
    fn single_line_replacement() {
        let out = apply_text_edits("hello world", &[edit((1, 7, 1, 12), "quill")]).expect("apply");
        assert_eq!(out, "hello quill");
    }

    #[test]
    fn zero_width_insertion() {
        let out = apply_text_edits("ab\ncd", &[edit((2, 2, 2, 2), "X")]).expect("apply");
        assert_eq!(out, "ab\ncXd");
    }

    #[test]
    fn multi_line_splice() {
        let content = "one\ntwo\nthree\nfour";
        let out = apply_text_edits(content, &[edit((2, 1, 3, 6), "TWO\nTHREE")]).expect("apply");
        assert_eq!(out, "one\nTWO\nTHREE\nfour");
    }

    #[test]
    fn replacement_collapsing_lines() {
        let content = "fn a() {\n    body\n}\n";
        let out = apply_text_edits(content, &[edit((1, 1, 3, 2), "fn a() {}")]).expect("apply");
        assert_eq!(out, "fn a() {}\n");
    }

    #[test]
    fn edits_apply_in_descending_order_without_shifting() {
        let content = "alpha beta gamma";
        let edits = [
            edit((1, 1, 1, 6), "A"),
            edit((1, 12, 1, 17), "G"),
        ];
        let out = apply_text_edits(content, &edits).expect("apply");
        assert_eq!(out, "A beta G");
    }

    #[test]
    fn end_column_past_line_length_is_clamped() {
        let out = apply_text_edits("short", &[edit((1, 1, 1, 999), "replaced")]).expect("apply");
        assert_eq!(out, "replaced");
    }

    #[test]
    fn touching_edits_do_not_overlap() {
        let content = "abcdef";
        let edits = [edit((1, 1, 1, 3), "X"), edit((1, 3, 1, 5), "Y")];
        let out = apply_text_edits(content, &edits).expect("apply");
        assert_eq!(out, "XYef");
    }

    #[test]
    fn overlapping_edits_are_rejected() {
        let content = "abcdef";
        let edits = [edit((1, 1, 1, 4), "X"), edit((1, 3, 1, 5), "Y")];
        assert_eq!(
            apply_text_edits(content, &edits),
            Err(TextEditError::Overlap { line: 1 })
        );
    }

    #[test]
    fn zero_indices_are_rejected() {
        assert!(matches!(
            apply_text_edits("a", &[edit((0, 1, 1, 1), "x")]),
            Err(TextEditError::ZeroIndex(_))
        ));
    }

    #[test]
    fn out_of_bounds_line_is_rejected() {
        assert!(matches!(
            apply_text_edits("a\nb", &[edit((5, 1, 5, 1), "x")]),
            Err(TextEditError::LineOutOfBounds { .. })
        ));
    }

    #[test]
    fn multibyte_columns_count_characters() {
        let out = apply_text_edits("héllo", &[edit((1, 2, 1, 3), "E")]).expect("apply");
        assert_eq!(out, "hEllo");
    }
}
