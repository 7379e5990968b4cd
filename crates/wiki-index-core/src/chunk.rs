//! Deterministic text chunker with a pluggable method table.
//!
//! Splits document content into ordered [`Chunk`]s according to a
//! collection's [`ChunkingPolicy`]. Identical inputs always produce an
//! identical chunk sequence: chunk ids are UUIDv5 values derived from the
//! document id and sequence index, and each chunk carries a SHA-256 hash
//! of its text.
//!
//! # Methods
//!
//! | Name | Behaviour |
//! |------|-----------|
//! | `fixed-size` | Sliding window of `max_chunk_size` characters; consecutive windows share `overlap` characters. |
//! | `paragraph` | Accumulates `\n\n`-separated paragraphs up to `max_chunk_size` characters. A paragraph is never split: a single oversized paragraph becomes its own chunk. `overlap` is ignored. |
//!
//! Unknown method names fail with [`IndexError::Configuration`]; there is
//! no silent fallback.
//!
//! # Example
//!
//! ```rust
//! use wiki_index_core::chunk::chunk;
//!
//! let content = "x".repeat(250);
//! let chunks = chunk("d1", &content, "fixed-size", 100, 20).unwrap();
//! assert_eq!(chunks.len(), 3);
//! assert_eq!(chunks[2].sequence_index, 2);
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{IndexError, IndexResult};
use crate::models::Chunk;

/// Supported chunking methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkingMethod {
    FixedSize,
    Paragraph,
}

/// Method name → method.
const METHODS: [(&str, ChunkingMethod); 2] = [
    ("fixed-size", ChunkingMethod::FixedSize),
    ("paragraph", ChunkingMethod::Paragraph),
];

impl ChunkingMethod {
    /// Resolve a method by name.
    pub fn from_name(name: &str) -> IndexResult<Self> {
        METHODS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, m)| *m)
            .ok_or_else(|| {
                IndexError::Configuration(format!(
                    "unknown chunking method '{}'; expected one of: {}",
                    name,
                    Self::names().join(", ")
                ))
            })
    }

    pub fn name(&self) -> &'static str {
        METHODS
            .iter()
            .find(|(_, m)| m == self)
            .map(|(n, _)| *n)
            .unwrap_or("fixed-size")
    }

    pub fn names() -> Vec<&'static str> {
        METHODS.iter().map(|(n, _)| *n).collect()
    }
}

/// A collection's chunking configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingPolicy {
    pub method: String,
    pub max_chunk_size: usize,
    #[serde(default)]
    pub overlap: usize,
}

impl ChunkingPolicy {
    pub fn new(method: &str, max_chunk_size: usize, overlap: usize) -> Self {
        Self {
            method: method.to_string(),
            max_chunk_size,
            overlap,
        }
    }

    /// Reject unknown methods and sizes the chunker cannot honour.
    pub fn validate(&self) -> IndexResult<ChunkingMethod> {
        let method = ChunkingMethod::from_name(&self.method)?;
        if self.max_chunk_size == 0 {
            return Err(IndexError::Configuration(
                "max_chunk_size must be > 0".to_string(),
            ));
        }
        if method == ChunkingMethod::FixedSize && self.overlap >= self.max_chunk_size {
            return Err(IndexError::Configuration(format!(
                "overlap ({}) must be smaller than max_chunk_size ({})",
                self.overlap, self.max_chunk_size
            )));
        }
        Ok(method)
    }

    pub fn apply(&self, document_id: &str, content: &str) -> IndexResult<Vec<Chunk>> {
        chunk(
            document_id,
            content,
            &self.method,
            self.max_chunk_size,
            self.overlap,
        )
    }
}

impl Default for ChunkingPolicy {
    fn default() -> Self {
        Self::new("fixed-size", 1000, 100)
    }
}

/// Split `content` into ordered chunks.
///
/// # Guarantees
///
/// - Sequence indices are contiguous: `0, 1, …, N-1`.
/// - Empty or whitespace-only content yields no chunks.
/// - Deterministic: same arguments, same chunks (ids and hashes included).
pub fn chunk(
    document_id: &str,
    content: &str,
    method: &str,
    max_chunk_size: usize,
    overlap: usize,
) -> IndexResult<Vec<Chunk>> {
    let policy = ChunkingPolicy::new(method, max_chunk_size, overlap);
    let method = policy.validate()?;

    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    Ok(match method {
        ChunkingMethod::FixedSize => fixed_size(document_id, content, max_chunk_size, overlap),
        ChunkingMethod::Paragraph => paragraphs(document_id, content, max_chunk_size),
    })
}

fn fixed_size(document_id: &str, content: &str, size: usize, overlap: usize) -> Vec<Chunk> {
    // Byte offset of every char, plus the end of the string.
    let mut bounds: Vec<usize> = content.char_indices().map(|(i, _)| i).collect();
    bounds.push(content.len());
    let total = bounds.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + size).min(total);
        let text = &content[bounds[start]..bounds[end]];
        chunks.push(make_chunk(
            document_id,
            chunks.len(),
            text,
            start,
            end - start,
        ));
        if end == total {
            break;
        }
        start = end - overlap;
    }
    chunks
}

/// Byte ranges of the trimmed, non-empty paragraphs of `content`.
fn paragraph_spans(content: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut offset = 0usize;
    for piece in content.split("\n\n") {
        let start = offset + (piece.len() - piece.trim_start().len());
        let end = offset + piece.trim_end().len();
        if end > start {
            spans.push((start, end));
        }
        offset += piece.len() + 2;
    }
    spans
}

fn paragraphs(document_id: &str, content: &str, max_chars: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;
    let mut buf_offset = 0usize;

    for (start, end) in paragraph_spans(content) {
        let para = &content[start..end];
        let para_chars = para.chars().count();

        if !buf.is_empty() && buf_chars + 2 + para_chars > max_chars {
            chunks.push(make_chunk(document_id, chunks.len(), &buf, buf_offset, buf_chars));
            buf.clear();
            buf_chars = 0;
        }

        if buf.is_empty() {
            buf_offset = content[..start].chars().count();
        } else {
            buf.push_str("\n\n");
            buf_chars += 2;
        }
        buf.push_str(para);
        buf_chars += para_chars;
    }

    if !buf.is_empty() {
        chunks.push(make_chunk(document_id, chunks.len(), &buf, buf_offset, buf_chars));
    }

    chunks
}

/// Create a single [`Chunk`] with a derived UUID and SHA-256 content hash.
fn make_chunk(
    document_id: &str,
    index: usize,
    text: &str,
    offset: usize,
    length: usize,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", document_id, index).as_bytes(),
    );

    Chunk {
        id: id.to_string(),
        document_id: document_id.to_string(),
        sequence_index: index,
        text: text.to_string(),
        hash,
        source_offset: Some(offset),
        length: Some(length),
    }
}
