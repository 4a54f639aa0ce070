//! Overlapping fixed-window text splitting.
//!
//! Windows are measured in characters (Unicode scalar values), never bytes, so a slice can
//! not end inside a multi-byte code point of OCR output. Each window starts `overlap`
//! characters before the previous one ended; when that would not move forward (an overlap at
//! least as large as the window) the next window starts exactly where the previous ended.

use super::types::ChunkingError;

/// Split `text` into ordered, overlapping windows of at most `chunk_size` characters.
///
/// Returns an empty vector for empty input and `ChunkingError::InvalidChunkSize` when
/// `chunk_size` is zero.
pub fn split_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<&str>, ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every character boundary, including the end of the text.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_len = boundaries.len() - 1;

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::with_capacity(char_len.div_ceil(step));
    let mut start = 0usize;
    while start < char_len {
        let end = (start + chunk_size).min(char_len);
        chunks.push(&text[boundaries[start]..boundaries[end]]);
        if end == char_len {
            break;
        }
        start = match end.checked_sub(overlap) {
            Some(next) if next > start => next,
            _ => end,
        };
    }

    Ok(chunks)
}
