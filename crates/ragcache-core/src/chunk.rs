//! Overlapping-window text chunker.
//!
//! Splits a [`SourceDocument`] body into [`Chunk`]s of roughly
//! `chunk_size` characters, keeping `overlap` characters shared between
//! consecutive chunks so context is not lost at the seams.
//!
//! # Algorithm
//!
//! 1. Start a window at character 0 with tentative end `start + chunk_size`.
//! 2. Unless the window reaches the end of the text, scan up to
//!    `lookahead` characters past the tentative end for a natural break,
//!    preferring a paragraph break (`\n\n`), then a line break, then a
//!    sentence end (`. `, `! `, `? `), then a space. The break character(s)
//!    stay in the current chunk. With no break found, cut hard at the
//!    tentative end.
//! 3. Emit the window verbatim (no trimming) and continue from
//!    `end - overlap`.
//! 4. Stop when a window reaches the end of the text, or when
//!    `max_chunks` is hit (logged as a warning).
//!
//! All sizes are counted in `char`s, never bytes, so multi-byte text is
//! never split inside a code point.
//!
//! # Guarantees
//!
//! - Empty documents produce no chunks.
//! - Indices are contiguous: `0, 1, …, N-1`.
//! - Every chunk is at most `chunk_size + lookahead` characters.
//! - Consecutive chunks share exactly `overlap` characters, so dropping the
//!   first `overlap` characters of every chunk after the first and
//!   concatenating reconstructs the document.
//!
//! # Example
//!
//! ```rust
//! use ragcache_core::chunk::{Chunker, ChunkerConfig};
//! use ragcache_core::models::SourceDocument;
//!
//! let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
//! let chunks = chunker.chunk(&SourceDocument::new("doc-1", "Hello world.\n\nSecond paragraph."));
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].index, 0);
//! ```

use tracing::warn;

use crate::error::{Error, Result};
use crate::models::{Chunk, SourceDocument};

/// Chunker parameters. Validated once by [`Chunker::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    pub lookahead: usize,
    pub max_chunks: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
            lookahead: 100,
            max_chunks: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

/// Break kinds in order of preference, with the byte pattern each one
/// matches. The whole pattern stays in the chunk being closed.
const BREAKS: [&[&str]; 4] = [&["\n\n"], &["\n"], &[". ", "! ", "? "], &[" "]];

impl Chunker {
    /// Build a chunker, rejecting parameters that cannot make progress.
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(Error::configuration("chunking.chunk_size must be > 0"));
        }
        if config.overlap >= config.chunk_size {
            return Err(Error::configuration(format!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                config.overlap, config.chunk_size
            )));
        }
        if config.max_chunks == 0 {
            return Err(Error::configuration("chunking.max_chunks must be > 0"));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split a document into ordered, overlapping chunks.
    pub fn chunk(&self, document: &SourceDocument) -> Vec<Chunk> {
        let text = document.body.as_str();
        if text.is_empty() {
            return Vec::new();
        }

        // Byte offset of every char, plus the end of the text.
        let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        offsets.push(text.len());
        let total = offsets.len() - 1;

        let ChunkerConfig {
            chunk_size,
            overlap,
            lookahead,
            max_chunks,
        } = self.config;

        let mut chunks = Vec::new();
        let mut start = 0usize;

        loop {
            if chunks.len() >= max_chunks {
                warn!(
                    document_id = %document.id,
                    max_chunks,
                    "chunk limit reached, remaining text not chunked"
                );
                break;
            }

            let mut end = (start + chunk_size).min(total);
            if end < total {
                let window_end = (end + lookahead).min(total);
                let window = &text[offsets[end]..offsets[window_end]];
                end += find_break(window).unwrap_or(0);
            }

            chunks.push(Chunk {
                text: text[offsets[start]..offsets[end]].to_string(),
                index: chunks.len(),
                source_document_id: document.id.clone(),
                source_url: document.url.clone(),
                metadata: document.metadata.clone(),
            });

            if end >= total {
                break;
            }
            // end >= start + chunk_size > start + overlap, so this always advances.
            start = end - overlap;
        }

        chunks
    }
}

/// Find the preferred break in `window`, returned as the number of chars
/// from the window start to just after the break pattern.
fn find_break(window: &str) -> Option<usize> {
    for patterns in BREAKS {
        let found = patterns
            .iter()
            .filter_map(|p| window.find(p).map(|pos| pos + p.len()))
            .min();
        if let Some(byte_end) = found {
            return Some(window[..byte_end].chars().count());
        }
    }
    None
}
