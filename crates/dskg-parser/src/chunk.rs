//! Fixed-width overlapping text windows
//!
//! Offsets are measured in characters, not bytes, so a window never splits a
//! UTF-8 sequence. Windows start every `chunk_size - overlap` characters and
//! stop at the first window that reaches the end of the text.

use crate::{ParserError, Result};

/// Chunking parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Window width in characters
    pub chunk_size: usize,

    /// Characters shared by consecutive windows
    pub overlap: usize,
}

impl ChunkConfig {
    /// Create a config, rejecting a zero size or an overlap that leaves no step
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ParserError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(ParserError::InvalidChunkConfig(format!(
                "overlap ({overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Distance between consecutive window starts
    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Number of windows for a text of `len` characters
    pub fn chunk_count(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else if len <= self.chunk_size {
            1
        } else {
            (len - self.chunk_size).div_ceil(self.step()) + 1
        }
    }
}

/// One window of the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Position in the chunk sequence
    pub index: usize,

    /// First character offset (inclusive)
    pub start: usize,

    /// Last character offset (exclusive)
    pub end: usize,

    /// Window content
    pub text: &'a str,
}

impl Chunk<'_> {
    /// Window width in characters
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Lazy iterator over the windows of a text
///
/// Cloning yields an independent iterator from the same position, so a
/// sequence can be restarted by cloning it before consumption.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    config: ChunkConfig,
    total_chars: usize,
    next_index: usize,
    next_char: usize,
    next_byte: usize,
    done: bool,
}

/// Split `text` into overlapping windows
pub fn chunk<'a>(text: &'a str, config: &ChunkConfig) -> Chunks<'a> {
    let total_chars = text.chars().count();
    Chunks {
        text,
        config: *config,
        total_chars,
        next_index: 0,
        next_char: 0,
        next_byte: 0,
        done: total_chars == 0,
    }
}

impl Chunks<'_> {
    /// Total number of windows in the full sequence
    pub fn total(&self) -> usize {
        self.config.chunk_count(self.total_chars)
    }

    /// Character length of the source text
    pub fn text_len(&self) -> usize {
        self.total_chars
    }

    fn remaining(&self) -> usize {
        if self.done {
            0
        } else {
            self.config.chunk_count(self.total_chars - self.next_char)
        }
    }
}

/// Byte offset of the `n`th character of `s`, or `s.len()` past the end
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let rest = &self.text[self.next_byte..];
        let start = self.next_char;
        let end = (start + self.config.chunk_size).min(self.total_chars);
        let width = byte_offset(rest, self.config.chunk_size);

        let item = Chunk {
            index: self.next_index,
            start,
            end,
            text: &rest[..width],
        };

        self.next_index += 1;
        if end >= self.total_chars {
            self.done = true;
        } else {
            let step = self.config.step();
            self.next_byte += byte_offset(rest, step);
            self.next_char += step;
        }

        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for Chunks<'_> {}

impl std::iter::FusedIterator for Chunks<'_> {}
