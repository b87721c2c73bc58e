// Chunk Segmenter Module
// Splits an answer into fixed-size text fragments for streaming.

/// Fragment size used by both stream endpoints
pub const DEFAULT_CHUNK_SIZE: usize = 3;

/// Split `text` into fragments of `size` characters, preserving order.
///
/// Sizes count characters rather than bytes so multi-byte text is never cut
/// inside a character. The last fragment may be shorter. A size of zero is
/// treated as one.
pub fn segment(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let mut fragments = Vec::with_capacity(text.chars().count().div_ceil(size));
    let mut current = String::new();
    let mut count = 0;

    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == size {
            fragments.push(std::mem::take(&mut current));
            count = 0;
        }
    }

    if !current.is_empty() {
        fragments.push(current);
    }

    fragments
}
