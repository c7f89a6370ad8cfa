//! Paragraph splitting ahead of embedding.

/// Longest paragraph handed to the embedder, in characters.
pub const DEFAULT_MAX_CHARS: usize = 2000;

/// Split `text` on blank lines (`"\n\n"`), cut paragraphs longer than
/// `max_chars` characters into consecutive pieces, and drop empty pieces.
///
/// Lengths count `char`s, so a multi-byte character is never split.
pub fn split_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut out = Vec::new();

    for paragraph in text.split("\n\n") {
        if paragraph.is_empty() {
            continue;
        }
        let mut rest = paragraph;
        while !rest.is_empty() {
            let cut = rest
                .char_indices()
                .nth(max_chars)
                .map_or(rest.len(), |(i, _)| i);
            out.push(rest[..cut].to_string());
            rest = &rest[cut..];
        }
    }

    tracing::debug!("Split {} bytes into {} paragraphs", text.len(), out.len());
    out
}
