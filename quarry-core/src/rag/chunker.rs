//! Deterministic text chunking.
//!
//! A document is cut into windows of at most `chunk_size` bytes, each window
//! starting `chunk_size - chunk_overlap` bytes after the previous one. Window
//! edges are moved to the nearest UTF-8 character boundary, so every chunk is
//! valid text. The same bytes and the same policy always produce the same
//! chunks, which is what lets a rebuild recognise unchanged chunks by their
//! content hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("Invalid chunking policy: {0}")]
    InvalidPolicy(String),
}

pub type Result<T> = std::result::Result<T, ChunkError>;

/// Chunk size and overlap, both in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingPolicy {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    50
}

impl Default for ChunkingPolicy {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingPolicy {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let policy = Self {
            chunk_size,
            chunk_overlap,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ChunkError::InvalidPolicy("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChunkError::InvalidPolicy(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    fn step(&self) -> usize {
        self.chunk_size.saturating_sub(self.chunk_overlap).max(1)
    }
}

/// A span of a document, the unit of embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub doc_key: String,
    /// Byte offset of the first byte, inclusive
    pub start: usize,
    /// Byte offset past the last byte
    pub end: usize,
    pub text: String,
    pub content_hash: String,
}

/// SHA-256 of `text`, lowercase hex.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Splits a document into chunks.
///
/// Documents that are empty or whitespace-only produce no chunks.
pub fn chunk_document(doc_key: &str, text: &str, policy: &ChunkingPolicy) -> Vec<Chunk> {
    chunk_spans(text, policy)
        .into_iter()
        .map(|(start, end)| {
            let span = &text[start..end];
            Chunk {
                doc_key: doc_key.to_string(),
                start,
                end,
                text: span.to_string(),
                content_hash: content_hash(span),
            }
        })
        .collect()
}

/// Byte ranges of each chunk of `text`.
pub(crate) fn chunk_spans(text: &str, policy: &ChunkingPolicy) -> Vec<(usize, usize)> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    if text.len() <= policy.chunk_size {
        return vec![(0, text.len())];
    }

    let mut spans = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + policy.chunk_size).min(text.len());

        // Find the nearest character boundary at or before 'end'
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        // A single character wider than the window still forms a chunk
        if end == start {
            end = start + 1;
            while end < text.len() && !text.is_char_boundary(end) {
                end += 1;
            }
        }

        spans.push((start, end));

        if end == text.len() {
            break;
        }

        let mut next = start + policy.step();
        while next < text.len() && !text.is_char_boundary(next) {
            next += 1;
        }
        // Never stall, never leave a gap
        start = next.max(start + 1).min(end);
        while start < text.len() && !text.is_char_boundary(start) {
            start += 1;
        }
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn test_chunk_small() {
        let policy = ChunkingPolicy::new(10, 2).unwrap();
        let chunks = chunk_document("a.txt", "Hello", &policy);
        assert_eq!(texts(&chunks), vec!["Hello"]);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 5));
    }

    #[test]
    fn test_chunk_with_overlap() {
        let policy = ChunkingPolicy::new(10, 2).unwrap();
        let chunks = chunk_document("a.txt", "0123456789ABCDEF", &policy);
        assert_eq!(texts(&chunks), vec!["0123456789", "89ABCDEF"]);
        assert_eq!((chunks[1].start, chunks[1].end), (8, 16));
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let policy = ChunkingPolicy::new(16, 4).unwrap();
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        let first = chunk_document("doc", &text, &policy);
        let second = chunk_document("doc", &text, &policy);
        assert_eq!(first, second);
        assert!(first.len() > 1);
    }

    #[test]
    fn test_chunks_cover_document() {
        let policy = ChunkingPolicy::new(7, 3).unwrap();
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = chunk_document("doc", text, &policy);
        assert_eq!(chunks.first().unwrap().start, 0);
        assert_eq!(chunks.last().unwrap().end, text.len());
        for pair in chunks.windows(2) {
            assert!(pair[1].start <= pair[0].end, "gap between chunks");
            assert!(pair[1].start > pair[0].start, "no progress");
        }
        for chunk in &chunks {
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
            assert!(chunk.text.len() <= 7);
        }
    }

    #[test]
    fn test_utf8_boundaries() {
        let policy = ChunkingPolicy::new(5, 1).unwrap();
        let text = "héllo wörld ünïcödé ✓✓✓";
        let chunks = chunk_document("doc", text, &policy);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
        }
        assert_eq!(chunks.last().unwrap().end, text.len());
    }

    #[test]
    fn test_window_narrower_than_character() {
        let policy = ChunkingPolicy::new(2, 1).unwrap();
        let text = "✓✓";
        let chunks = chunk_document("doc", text, &policy);
        assert_eq!(texts(&chunks), vec!["✓", "✓"]);
    }

    #[test]
    fn test_blank_document_has_no_chunks() {
        let policy = ChunkingPolicy::default();
        assert!(chunk_document("doc", "", &policy).is_empty());
        assert!(chunk_document("doc", "  \n\t ", &policy).is_empty());
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_policy_validation() {
        assert!(ChunkingPolicy::default().validate().is_ok());
        assert!(ChunkingPolicy::new(0, 0).is_err());
        assert!(ChunkingPolicy::new(10, 10).is_err());
        assert!(ChunkingPolicy::new(10, 9).is_ok());
    }
}
