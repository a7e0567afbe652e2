use sha2::Digest;
use sha2::Sha256;
use std::borrow::Cow;

/// Collapse CRLF and lone CR to LF so content compares equal across
/// platforms. Base and expected hashes are always computed over the
/// normalized form.
pub fn normalize_line_endings(input: &str) -> Cow<'_, str> {
    if !input.contains('\r') {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(ch);
        }
    }
    Cow::Owned(out)
}

/// Lowercase hex SHA-256 over line-ending-normalized content.
pub fn normalized_sha256(content: &str) -> String {
    let normalized = normalize_line_endings(content);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}
