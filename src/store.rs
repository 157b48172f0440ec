//! Knowledge-base persistence.
//!
//! SQLite (WAL mode) holds the normalized documents, their chunks, and the
//! chunk vectors so a knowledge base survives across invocations and
//! re-ingestion stays idempotent. The vector index itself lives in memory
//! ([`crate::index`]); vectors are written through here and the graph is
//! rebuilt from this table on open.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{Chunk, ChunkMetadata, Document};

pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create the schema. Idempotent; safe to run on every startup.
pub async fn init(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source_uri TEXT NOT NULL UNIQUE,
            title TEXT,
            raw_text TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL REFERENCES documents(id),
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            token_count INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY REFERENCES chunks(id),
            source_uri TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn upsert_document(pool: &SqlitePool, doc: &Document) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO documents (id, source_uri, title, raw_text)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            raw_text = excluded.raw_text
        "#,
    )
    .bind(&doc.id)
    .bind(&doc.source_uri)
    .bind(&doc.title)
    .bind(&doc.raw_text)
    .execute(pool)
    .await?;
    Ok(())
}

/// Replace a document's chunks wholesale. Stale vectors for removed chunk
/// ids go with them.
pub async fn replace_chunks(pool: &SqlitePool, document_id: &str, chunks: &[Chunk]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, ordinal, text, token_count) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.ordinal)
        .bind(&chunk.text)
        .bind(chunk.token_count as i64)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn upsert_vector(
    pool: &SqlitePool,
    chunk_id: &str,
    metadata: &ChunkMetadata,
    vector: &[f32],
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chunk_vectors (chunk_id, source_uri, ordinal, dims, embedding)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            source_uri = excluded.source_uri,
            ordinal = excluded.ordinal,
            dims = excluded.dims,
            embedding = excluded.embedding
        "#,
    )
    .bind(chunk_id)
    .bind(&metadata.source_uri)
    .bind(metadata.ordinal)
    .bind(vector.len() as i64)
    .bind(vec_to_blob(vector))
    .execute(pool)
    .await?;
    Ok(())
}

/// All persisted vectors, ordered by chunk id for a deterministic graph
/// rebuild.
pub async fn load_vectors(
    pool: &SqlitePool,
) -> Result<Vec<(String, Vec<f32>, ChunkMetadata)>> {
    let rows = sqlx::query(
        "SELECT chunk_id, source_uri, ordinal, embedding FROM chunk_vectors ORDER BY chunk_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            (
                row.get::<String, _>("chunk_id"),
                blob_to_vec(&blob),
                ChunkMetadata {
                    source_uri: row.get("source_uri"),
                    ordinal: row.get("ordinal"),
                },
            )
        })
        .collect())
}

pub async fn chunk_text(pool: &SqlitePool, chunk_id: &str) -> Result<Option<String>> {
    let text: Option<String> = sqlx::query_scalar("SELECT text FROM chunks WHERE id = ?")
        .bind(chunk_id)
        .fetch_optional(pool)
        .await?;
    Ok(text)
}

/// Knowledge-base counters surfaced by `tutor stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub document_count: i64,
    pub chunk_count: i64,
    pub index_size: i64,
}

pub async fn stats(pool: &SqlitePool) -> Result<StoreStats> {
    let document_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    let index_size: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(pool)
        .await?;

    Ok(StoreStats {
        document_count,
        chunk_count,
        index_size,
    })
}
