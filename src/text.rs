//! Text chunking for ingestion.

use crate::error::{MemvidError, Result};

/// A sentence break is honoured only when it falls in the last fifth of a window.
const SENTENCE_BREAK_RATIO: f64 = 0.8;

/// Split `text` into overlapping windows of at most `chunk_size` characters.
///
/// Windows that stop short of the end of the text are cut just after their last `.` when that
/// period lies beyond 80% of the window. Consecutive windows share `overlap` characters.
/// Chunks are trimmed and empty chunks dropped; positions are counted in `char`s so a UTF-8
/// code point is never split.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    chunk_text_within(text, chunk_size, overlap, usize::MAX)
}

/// [`chunk_text`] with a second limit: a window also ends before its JSON-escaped UTF-8 size
/// would exceed `max_bytes`, the space a frame payload has for chunk text.
pub fn chunk_text_within(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    max_bytes: usize,
) -> Result<Vec<String>> {
    if chunk_size == 0 {
        return Err(MemvidError::config("chunk size must be non-zero"));
    }
    if overlap >= chunk_size {
        return Err(MemvidError::config(format!(
            "chunk overlap {overlap} must be smaller than chunk size {chunk_size}"
        )));
    }

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let limit = (start + chunk_size).min(chars.len());
        let mut end = start;
        let mut bytes = 0usize;
        while end < limit {
            let cost = escaped_len(chars[end]);
            if bytes + cost > max_bytes {
                break;
            }
            bytes += cost;
            end += 1;
        }
        if end == start {
            return Err(MemvidError::config(format!(
                "a frame holds {max_bytes} bytes of text, too few for one character"
            )));
        }

        let window = end - start;
        if end < chars.len() {
            if let Some(pos) = chars[start..end].iter().rposition(|c| *c == '.') {
                if pos as f64 > window as f64 * SENTENCE_BREAK_RATIO {
                    end = start + pos + 1;
                }
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        if end >= chars.len() {
            break;
        }
        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }
    Ok(chunks)
}

/// Bytes `c` occupies inside a JSON string.
fn escaped_len(c: char) -> usize {
    match c {
        '"' | '\\' | '\n' | '\r' | '\t' | '\u{08}' | '\u{0c}' => 2,
        c if u32::from(c) < 0x20 => 6,
        c => c.len_utf8(),
    }
}
