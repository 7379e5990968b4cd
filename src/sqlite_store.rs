//! SQLite-backed [`IndexStore`] implementation.
//!
//! Chunk sets are replaced inside one transaction, so concurrent readers
//! (WAL snapshots) see either the old set or the new one. Vectors are
//! stored as little-endian `f32` blobs; search is brute-force cosine.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use wiki_index_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use wiki_index_core::models::Chunk;
use wiki_index_core::store::{
    rank, snippet, ChunkResponse, DocumentMetadata, IndexStore, QueryFilter, ScoredChunk,
};
use wiki_index_core::{IndexError, IndexResult};

use crate::config::DbConfig;
use crate::{db, migrate};

/// SQLite implementation of the [`IndexStore`] trait.
pub struct SqliteIndexStore {
    pool: SqlitePool,
}

impl SqliteIndexStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect and migrate.
    pub async fn open(config: &DbConfig) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
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

        let mut tx = self.pool.begin().await.map_err(IndexError::storage)?;

        sqlx::query("DELETE FROM index_chunks WHERE collection = ? AND document_id = ?")
            .bind(&metadata.collection)
            .bind(&metadata.document_id)
            .execute(&mut *tx)
            .await
            .map_err(IndexError::storage)?;

        if chunks.is_empty() {
            sqlx::query("DELETE FROM index_documents WHERE collection = ? AND document_id = ?")
                .bind(&metadata.collection)
                .bind(&metadata.document_id)
                .execute(&mut *tx)
                .await
                .map_err(IndexError::storage)?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO index_documents (collection, document_id, title, language, url,
                                             mime_type, embedding_model, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, document_id) DO UPDATE SET
                    title = excluded.title,
                    language = excluded.language,
                    url = excluded.url,
                    mime_type = excluded.mime_type,
                    embedding_model = excluded.embedding_model,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&metadata.collection)
            .bind(&metadata.document_id)
            .bind(&metadata.title)
            .bind(&metadata.language)
            .bind(&metadata.url)
            .bind(&metadata.mime_type)
            .bind(&metadata.embedding_model)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await
            .map_err(IndexError::storage)?;

            for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
                sqlx::query(
                    r#"
                    INSERT INTO index_chunks (collection, document_id, chunk_index, chunk_id,
                                              text, hash, source_offset, length, dims, embedding)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&metadata.collection)
                .bind(&metadata.document_id)
                .bind(chunk.sequence_index as i64)
                .bind(&chunk.id)
                .bind(&chunk.text)
                .bind(&chunk.hash)
                .bind(chunk.source_offset.map(|o| o as i64))
                .bind(chunk.length.map(|l| l as i64))
                .bind(vector.len() as i64)
                .bind(vec_to_blob(vector))
                .execute(&mut *tx)
                .await
                .map_err(IndexError::storage)?;
            }
        }

        tx.commit().await.map_err(IndexError::storage)?;
        Ok(())
    }

    async fn delete_document(&self, collection: &str, document_id: &str) -> IndexResult<usize> {
        let mut tx = self.pool.begin().await.map_err(IndexError::storage)?;
        let removed =
            sqlx::query("DELETE FROM index_chunks WHERE collection = ? AND document_id = ?")
                .bind(collection)
                .bind(document_id)
                .execute(&mut *tx)
                .await
                .map_err(IndexError::storage)?
                .rows_affected();
        sqlx::query("DELETE FROM index_documents WHERE collection = ? AND document_id = ?")
            .bind(collection)
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(IndexError::storage)?;
        tx.commit().await.map_err(IndexError::storage)?;
        Ok(removed as usize)
    }

    async fn delete_collection(&self, collection: &str) -> IndexResult<usize> {
        let mut tx = self.pool.begin().await.map_err(IndexError::storage)?;
        let removed = sqlx::query("DELETE FROM index_chunks WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await
            .map_err(IndexError::storage)?
            .rows_affected();
        sqlx::query("DELETE FROM index_documents WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await
            .map_err(IndexError::storage)?;
        tx.commit().await.map_err(IndexError::storage)?;
        Ok(removed as usize)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &QueryFilter,
    ) -> IndexResult<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            "SELECT collection, document_id, chunk_index, text, embedding FROM index_chunks",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(IndexError::storage)?;

        let mut hits = Vec::new();
        for row in &rows {
            let collection: String = row.get("collection");
            if !filter.admits(&collection) {
                continue;
            }
            let blob: Vec<u8> = row.get("embedding");
            let text: String = row.get("text");
            let chunk_index: i64 = row.get("chunk_index");
            hits.push(ScoredChunk {
                collection,
                document_id: row.get("document_id"),
                chunk_index: chunk_index as usize,
                score: cosine_similarity(vector, &blob_to_vec(&blob)),
                snippet: snippet(&text),
            });
        }

        rank(&mut hits, k);
        Ok(hits)
    }

    async fn document_chunks(
        &self,
        collection: &str,
        document_id: &str,
    ) -> IndexResult<Vec<ChunkResponse>> {
        let rows = sqlx::query(
            "SELECT chunk_index, text, hash FROM index_chunks \
             WHERE collection = ? AND document_id = ? ORDER BY chunk_index ASC",
        )
        .bind(collection)
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(IndexError::storage)?;

        Ok(rows
            .iter()
            .map(|row| {
                let index: i64 = row.get("chunk_index");
                ChunkResponse {
                    index: index as usize,
                    text: row.get("text"),
                    hash: row.get("hash"),
                }
            })
            .collect())
    }

    async fn documents(&self, collection: &str) -> IndexResult<Vec<DocumentMetadata>> {
        let rows = sqlx::query(
            "SELECT document_id, title, language, url, mime_type, embedding_model \
             FROM index_documents WHERE collection = ? ORDER BY document_id ASC",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(IndexError::storage)?;

        Ok(rows
            .iter()
            .map(|row| DocumentMetadata {
                collection: collection.to_string(),
                document_id: row.get("document_id"),
                title: row.get("title"),
                language: row.get("language"),
                url: row.get("url"),
                mime_type: row.get("mime_type"),
                embedding_model: row.get("embedding_model"),
            })
            .collect())
    }

    async fn chunk_count(&self, collection: Option<&str>) -> IndexResult<usize> {
        let count: i64 = match collection {
            Some(name) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM index_chunks WHERE collection = ?")
                    .bind(name)
                    .fetch_one(&self.pool)
                    .await
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM index_chunks")
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .map_err(IndexError::storage)?;
        Ok(count as usize)
    }

    async fn clear(&self) -> IndexResult<()> {
        let mut tx = self.pool.begin().await.map_err(IndexError::storage)?;
        sqlx::query("DELETE FROM index_chunks")
            .execute(&mut *tx)
            .await
            .map_err(IndexError::storage)?;
        sqlx::query("DELETE FROM index_documents")
            .execute(&mut *tx)
            .await
            .map_err(IndexError::storage)?;
        tx.commit().await.map_err(IndexError::storage)?;
        Ok(())
    }
}
