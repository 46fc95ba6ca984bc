//! Bounded views over command output.

/// Keep at most the trailing `limit` bytes of `text`, never splitting a
/// UTF-8 sequence. Applying it twice yields the same result.
pub fn tail(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Owned variant of [`tail`] for lossily decoded process output.
pub fn tail_lossy(bytes: &[u8], limit: usize) -> String {
    let decoded = String::from_utf8_lossy(bytes);
    tail(&decoded, limit).to_string()
}

/// Keep at most the trailing `limit` characters of `text`.
pub fn tail_chars(text: &str, limit: usize) -> &str {
    if limit == 0 {
        return "";
    }
    match text.char_indices().rev().nth(limit - 1) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}
