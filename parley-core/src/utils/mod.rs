//! Utility functions and helpers

/// Truncate a string to a maximum byte length, ensuring valid UTF-8 boundaries
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut end = max_len.saturating_sub(3);
        while !s.is_char_boundary(end) {
            end = end.saturating_sub(1);
        }
        format!("{}...", &s[..end])
    }
}

/// Return the first sentence of `text`, trimmed.
///
/// Sentence ends are ASCII `.!?` followed by whitespace or end of input, and
/// the CJK terminators `。！？`. Text without a terminator is returned whole.
pub fn first_sentence(text: &str) -> &str {
    let text = text.trim();
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        let end = idx + c.len_utf8();
        match c {
            '。' | '！' | '？' => return &text[..end],
            '.' | '!' | '?' => match chars.peek() {
                None => return &text[..end],
                Some((_, next)) if next.is_whitespace() => return &text[..end],
                _ => {}
            },
            _ => {}
        }
    }
    text
}

/// Collapse runs of whitespace into single spaces
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
