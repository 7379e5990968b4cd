use anyhow::Result;
use sqlx::SqlitePool;

/// Create the index schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per indexed document
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_documents (
            collection TEXT NOT NULL,
            document_id TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            language TEXT NOT NULL DEFAULT '',
            url TEXT NOT NULL DEFAULT '',
            mime_type TEXT NOT NULL DEFAULT 'text/plain',
            embedding_model TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, document_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunk text and its vector; replaced as a set per document
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_chunks (
            collection TEXT NOT NULL,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_id TEXT NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            source_offset INTEGER,
            length INTEGER,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (collection, document_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_index_chunks_collection ON index_chunks(collection)")
        .execute(pool)
        .await?;

    Ok(())
}
