//! In-memory [`IndexStore`] implementation for tests and embedded use.
//!
//! All chunk sets live in one map behind a single `RwLock`, so a replace
//! (delete + insert under one write guard) is never observable half-done
//! by a query (which holds the read guard for its whole scan). Search is
//! brute-force cosine similarity.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{IndexError, IndexResult};
use crate::models::Chunk;

use super::{
    rank, snippet, ChunkResponse, DocumentMetadata, IndexStore, QueryFilter, ScoredChunk,
};

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
}

struct StoredDocument {
    metadata: DocumentMetadata,
    chunks: Vec<StoredChunk>,
}

type DocKey = (String, String);

/// In-memory index store.
pub struct InMemoryIndexStore {
    docs: RwLock<BTreeMap<DocKey, StoredDocument>>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryIndexStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> IndexError {
    IndexError::Storage("in-memory index lock poisoned".to_string())
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn upsert_document(
        &self,
        metadata: &DocumentMetadata,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> IndexResult<()> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::Storage(format!(
                "{} chunks but {} vectors for {}",
                chunks.len(),
                vectors.len(),
                metadata.document_id
            )));
        }

        let stored: Vec<StoredChunk> = chunks
            .iter()
            .zip(vectors.iter())
            .map(|(c, v)| StoredChunk {
                chunk: c.clone(),
                vector: v.clone(),
            })
            .collect();

        let key = (metadata.collection.clone(), metadata.document_id.clone());
        let mut docs = self.docs.write().map_err(poisoned)?;
        if stored.is_empty() {
            docs.remove(&key);
        } else {
            docs.insert(
                key,
                StoredDocument {
                    metadata: metadata.clone(),
                    chunks: stored,
                },
            );
        }
        Ok(())
    }

    async fn delete_document(&self, collection: &str, document_id: &str) -> IndexResult<usize> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        Ok(docs
            .remove(&(collection.to_string(), document_id.to_string()))
            .map(|d| d.chunks.len())
            .unwrap_or(0))
    }

    async fn delete_collection(&self, collection: &str) -> IndexResult<usize> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        let mut removed = 0;
        docs.retain(|(coll, _), doc| {
            if coll == collection {
                removed += doc.chunks.len();
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &QueryFilter,
    ) -> IndexResult<Vec<ScoredChunk>> {
        let docs = self.docs.read().map_err(poisoned)?;
        let mut hits: Vec<ScoredChunk> = docs
            .iter()
            .filter(|((collection, _), _)| filter.admits(collection))
            .flat_map(|((collection, document_id), doc)| {
                doc.chunks.iter().map(move |sc| ScoredChunk {
                    collection: collection.clone(),
                    document_id: document_id.clone(),
                    chunk_index: sc.chunk.sequence_index,
                    score: cosine_similarity(vector, &sc.vector),
                    snippet: snippet(&sc.chunk.text),
                })
            })
            .collect();
        rank(&mut hits, k);
        Ok(hits)
    }

    async fn document_chunks(
        &self,
        collection: &str,
        document_id: &str,
    ) -> IndexResult<Vec<ChunkResponse>> {
        let docs = self.docs.read().map_err(poisoned)?;
        let mut chunks: Vec<ChunkResponse> = docs
            .get(&(collection.to_string(), document_id.to_string()))
            .map(|doc| {
                doc.chunks
                    .iter()
                    .map(|sc| ChunkResponse {
                        index: sc.chunk.sequence_index,
                        text: sc.chunk.text.clone(),
                        hash: sc.chunk.hash.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        chunks.sort_by_key(|c| c.index);
        Ok(chunks)
    }

    async fn documents(&self, collection: &str) -> IndexResult<Vec<DocumentMetadata>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs
            .iter()
            .filter(|((coll, _), _)| coll == collection)
            .map(|(_, doc)| doc.metadata.clone())
            .collect())
    }

    async fn chunk_count(&self, collection: Option<&str>) -> IndexResult<usize> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs
            .iter()
            .filter(|((coll, _), _)| collection.map(|c| c == coll).unwrap_or(true))
            .map(|(_, doc)| doc.chunks.len())
            .sum())
    }

    async fn clear(&self) -> IndexResult<()> {
        self.docs.write().map_err(poisoned)?.clear();
        Ok(())
    }
}
