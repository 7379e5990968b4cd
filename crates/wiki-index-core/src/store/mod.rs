//! Index storage abstraction.
//!
//! The [`IndexStore`] trait is the narrow interface the indexing pipeline
//! and the query facade use to reach the vector-search backend. It keeps
//! the chunk set of every `(collection, document)` pair and serves
//! nearest-neighbour queries over their vectors.
//!
//! # Atomic replace
//!
//! [`upsert_document`](IndexStore::upsert_document) is delete-then-insert
//! from the backend's point of view but one logical call from the
//! pipeline's: implementations must never let a concurrent
//! [`query`](IndexStore::query) observe a mix of the old and new chunk
//! sets of a document.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::error::IndexResult;
use crate::models::Chunk;

/// Metadata stored alongside a document's chunk set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMetadata {
    pub collection: String,
    pub document_id: String,
    pub title: String,
    pub language: String,
    pub url: String,
    pub mime_type: String,
    /// Model that produced the vectors.
    pub embedding_model: String,
}

/// A ranked query hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub collection: String,
    pub document_id: String,
    pub chunk_index: usize,
    /// Cosine similarity to the query vector.
    pub score: f32,
    /// Text excerpt for display.
    pub snippet: String,
}

/// A stored chunk, as returned by [`IndexStore::document_chunks`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkResponse {
    pub index: usize,
    pub text: String,
    pub hash: String,
}

/// Restricts a query to a set of collections.
///
/// `collections` is the caller's explicit filter; `allowed` is the set of
/// collections the caller may `use`. A hit must satisfy both when set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    pub collections: Option<BTreeSet<String>>,
    pub allowed: Option<BTreeSet<String>>,
}

impl QueryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn collections<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            collections: Some(names.into_iter().map(Into::into).collect()),
            allowed: None,
        }
    }

    pub fn with_allowed(mut self, allowed: BTreeSet<String>) -> Self {
        self.allowed = Some(allowed);
        self
    }

    pub fn admits(&self, collection: &str) -> bool {
        let explicit = self
            .collections
            .as_ref()
            .map(|set| set.contains(collection))
            .unwrap_or(true);
        let permitted = self
            .allowed
            .as_ref()
            .map(|set| set.contains(collection))
            .unwrap_or(true);
        explicit && permitted
    }
}

/// Length of the text excerpt carried by [`ScoredChunk::snippet`].
pub const SNIPPET_CHARS: usize = 240;

/// Abstract vector-search backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](IndexStore::upsert_document) | Atomically replace a document's chunk set |
/// | [`delete_document`](IndexStore::delete_document) | Remove a document's chunks |
/// | [`delete_collection`](IndexStore::delete_collection) | Remove every chunk of a collection |
/// | [`query`](IndexStore::query) | Cosine similarity search |
/// | [`document_chunks`](IndexStore::document_chunks) | Inspect a document's stored chunks |
/// | [`documents`](IndexStore::documents) | List a collection's indexed documents |
/// | [`chunk_count`](IndexStore::chunk_count) | Count stored chunks |
/// | [`clear`](IndexStore::clear) | Wipe the whole index |
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Replace the document's entire chunk set with `chunks` + `vectors`.
    ///
    /// `vectors[i]` is the embedding of `chunks[i]`; the lengths must match.
    /// An empty chunk set removes the document from the index.
    async fn upsert_document(
        &self,
        metadata: &DocumentMetadata,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> IndexResult<()>;

    /// Remove a document's chunks. Returns the number of chunks removed.
    async fn delete_document(&self, collection: &str, document_id: &str) -> IndexResult<usize>;

    /// Remove every chunk of a collection. Returns the number removed.
    async fn delete_collection(&self, collection: &str) -> IndexResult<usize>;

    /// Return the `k` chunks most similar to `vector`, best first.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &QueryFilter,
    ) -> IndexResult<Vec<ScoredChunk>>;

    /// The document's stored chunks ordered by sequence index.
    async fn document_chunks(
        &self,
        collection: &str,
        document_id: &str,
    ) -> IndexResult<Vec<ChunkResponse>>;

    /// Metadata of every indexed document in a collection, ordered by id.
    async fn documents(&self, collection: &str) -> IndexResult<Vec<DocumentMetadata>>;

    /// Number of stored chunks, optionally restricted to one collection.
    async fn chunk_count(&self, collection: Option<&str>) -> IndexResult<usize>;

    /// Remove everything.
    async fn clear(&self) -> IndexResult<()>;
}

pub fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_CHARS).collect()
}

/// Order hits by descending score, ties broken by position, and keep `k`.
pub fn rank(hits: &mut Vec<ScoredChunk>, k: usize) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.collection.cmp(&b.collection))
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
    hits.truncate(k);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_all_admits_everything() {
        assert!(QueryFilter::all().admits("Docs"));
    }

    #[test]
    fn test_filter_requires_both_sets() {
        let filter = QueryFilter::collections(["Docs", "Specs"])
            .with_allowed(BTreeSet::from(["Docs".to_string()]));
        assert!(filter.admits("Docs"));
        assert!(!filter.admits("Specs"));
        assert!(!filter.admits("Other"));
    }
}
