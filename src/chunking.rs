//! Splitting extracted text into overlapping windows that are embedded one
//! by one.
//!
//! Sizes are in characters, not bytes, so multi-byte text is never cut
//! inside a code point. Windows end at whitespace when one is close enough.

use crate::error::{Error, Result};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// How far back from a window's end to look for whitespace.
const BOUNDARY_LOOKBACK: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Maximum chunk size in characters.
    pub size: usize,
    /// Characters shared by adjacent chunks.
    pub overlap: usize,
}

impl ChunkOptions {
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::Config("chunk size must be positive".into()));
        }
        if overlap >= size {
            return Err(Error::Config(format!(
                "chunk overlap ({overlap}) must be smaller than chunk size ({size})"
            )));
        }
        Ok(Self { size, overlap })
    }
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A window of a larger text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Zero-based position within the document.
    pub index: usize,
    /// Byte offset where this chunk starts in the original text.
    pub start_offset: usize,
}

/// Split text into chunks of at most `options.size` characters.
///
/// Whitespace-only text yields no chunks; text that fits in one window
/// yields exactly one. Every character of the input is covered by at least
/// one chunk.
///
/// # Examples
///
/// ```
/// use docfinder::chunking::{ChunkOptions, chunk_text};
///
/// let chunks = chunk_text("Hello, world!", ChunkOptions::default());
/// assert_eq!(chunks.len(), 1);
///
/// let text = "word ".repeat(500);
/// let chunks = chunk_text(&text, ChunkOptions::new(1000, 200).unwrap());
/// assert!(chunks.len() >= 3);
/// ```
pub fn chunk_text(text: &str, options: ChunkOptions) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let char_count = text.chars().count();
    if char_count <= options.size {
        return vec![Chunk {
            text: text.to_string(),
            index: 0,
            start_offset: 0,
        }];
    }

    // char index -> byte index, with one past-the-end entry
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let window_end = (start + options.size).min(char_count);
        let end = if window_end < char_count {
            word_boundary(text, &char_to_byte, start, window_end)
        } else {
            window_end
        };

        let slice = &text[char_to_byte[start]..char_to_byte[end]];
        if !slice.trim().is_empty() {
            chunks.push(Chunk {
                text: slice.to_string(),
                index: chunks.len(),
                start_offset: char_to_byte[start],
            });
        }

        if end >= char_count {
            break;
        }
        start = end.saturating_sub(options.overlap).max(start + 1);
    }

    chunks
}

/// Char position just after the last whitespace in the lookback region
/// before `end`, or `end` itself if there is none.
fn word_boundary(
    text: &str,
    char_to_byte: &[usize],
    start: usize,
    end: usize,
) -> usize {
    let floor = end.saturating_sub(BOUNDARY_LOOKBACK).max(start + 1);
    let region = &text[char_to_byte[floor]..char_to_byte[end]];
    match region.rfind(char::is_whitespace) {
        Some(offset) => {
            let ws_byte = char_to_byte[floor] + offset;
            char_to_byte.partition_point(|&b| b <= ws_byte)
        }
        None => end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(size: usize, overlap: usize) -> ChunkOptions {
        ChunkOptions::new(size, overlap).unwrap()
    }

    #[test]
    fn short_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", ChunkOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].start_offset, 0);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(chunk_text("", ChunkOptions::default()).is_empty());
        assert!(chunk_text("  \n\t ", ChunkOptions::default()).is_empty());
    }

    #[test]
    fn long_text_multiple_overlapping_chunks() {
        let text = "word ".repeat(500); // 2500 chars
        let chunks = chunk_text(&text, opts(1000, 200));

        assert!(chunks.len() >= 3);
        assert_eq!(chunks[1].index, 1);

        let first_end = chunks[0].start_offset + chunks[0].text.len();
        assert!(chunks[1].start_offset < first_end, "chunks should overlap");
    }

    #[test]
    fn chunks_end_at_whitespace() {
        let text = "alpha beta gamma delta ".repeat(100);
        for chunk in chunk_text(&text, opts(150, 30)).iter().rev().skip(1) {
            assert!(chunk.text.ends_with(' '), "{:?}", chunk.text);
        }
    }

    #[test]
    fn chunks_cover_full_text() {
        let text = "a".repeat(3000);
        let chunks = chunk_text(&text, opts(1000, 200));

        assert_eq!(chunks[0].start_offset, 0);
        let last = chunks.last().unwrap();
        assert_eq!(last.start_offset + last.text.len(), text.len());
    }

    #[test]
    fn no_overlap_tiles_text_exactly() {
        let text = "abcdefghij".repeat(30);
        let chunks = chunk_text(&text, opts(100, 0));
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn handles_multibyte_chars() {
        let text = "café ☕ naïve 日本語 🎉 ".repeat(50);
        let chunks = chunk_text(&text, opts(100, 20));

        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 100);
            assert!(text.is_char_boundary(chunk.start_offset));
        }
    }

    #[test]
    fn invalid_options_are_rejected() {
        assert!(ChunkOptions::new(0, 0).is_err());
        assert!(ChunkOptions::new(100, 100).is_err());
        assert!(ChunkOptions::new(100, 99).is_ok());
    }
}
