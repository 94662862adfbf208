//! Length-prefixed literal escaping.
//!
//! PepTalk arguments that may contain spaces, line breaks or other
//! significant characters are sent as `{N}<bytes>`, where `N` is the UTF-8
//! byte length of the literal.

/// Escapes a single argument as a length-prefixed literal.
///
/// The empty string is passed through unchanged.
pub fn escape(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    format!("{{{}}}{}", s.len(), s)
}

/// Removes every `{N}` length marker from `s`, leaving the raw content.
pub fn unescape(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = marker_end(bytes, i) {
                out.push_str(&s[copied..i]);
                i = end;
                copied = end;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&s[copied..]);
    out
}

/// If a complete `{digits}` marker starts at `start`, returns the index just
/// past its closing brace.
fn marker_end(bytes: &[u8], start: usize) -> Option<usize> {
    let digits = bytes[start + 1..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    let close = start + 1 + digits;
    if digits > 0 && bytes.get(close) == Some(&b'}') {
        Some(close + 1)
    } else {
        None
    }
}
