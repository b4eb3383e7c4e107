//! Overlapping word-window chunker.
//!
//! Text is split on whitespace and cut into windows of `size` words, each
//! starting `size - overlap` words after the previous one. Consecutive
//! windows share exactly `overlap` words. The last window may be shorter
//! and is always kept; a window is only started if it reaches words the
//! previous one did not cover.

use policypilot_core::document::{Document, DocumentMetadata};
use policypilot_core::error::Error;
use sha2::{Digest, Sha256};

/// Window geometry, validated on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordWindow {
    size: usize,
    overlap: usize,
}

impl WordWindow {
    pub fn new(size: usize, overlap: usize) -> Result<Self, Error> {
        if size == 0 || overlap >= size {
            return Err(Error::Config {
                message: format!("invalid chunk window: {size} words with {overlap} overlap"),
            });
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn stride(&self) -> usize {
        self.size - self.overlap
    }
}

impl Default for WordWindow {
    /// 150 words with a 50-word overlap.
    fn default() -> Self {
        Self {
            size: 150,
            overlap: 50,
        }
    }
}

/// Word range `[start, start + len)` of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordSpan {
    pub start: usize,
    pub len: usize,
}

/// Compute the window spans for a text of `word_count` words.
pub fn window_spans(word_count: usize, window: WordWindow) -> Vec<WordSpan> {
    let mut spans = Vec::new();
    let mut start = 0;
    while start < word_count {
        let end = (start + window.size).min(word_count);
        spans.push(WordSpan {
            start,
            len: end - start,
        });
        if end == word_count {
            break;
        }
        start += window.stride();
    }
    spans
}

/// Split one source into chunk documents.
pub fn chunk_document(file_path: &str, text: &str, window: WordWindow) -> Vec<Document> {
    let words: Vec<&str> = text.split_whitespace().collect();

    window_spans(words.len(), window)
        .into_iter()
        .enumerate()
        .map(|(chunk_index, span)| {
            let content = words[span.start..span.start + span.len].join(" ");
            Document {
                id: chunk_id(file_path, chunk_index, &content),
                content,
                metadata: DocumentMetadata {
                    file_path: file_path.to_string(),
                    chunk_index,
                    word_start: span.start,
                    word_count: span.len,
                },
            }
        })
        .collect()
}

/// Deterministic chunk id: SHA-256 over path, index and content.
fn chunk_id(file_path: &str, chunk_index: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update([0]);
    hasher.update(chunk_index.to_le_bytes());
    hasher.update([0]);
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
