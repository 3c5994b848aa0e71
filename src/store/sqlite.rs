//! SQLite-backed store implementations.
//!
//! [`SqliteStore`] keeps sources, documents, chunk rows, and an FTS5
//! full-text index; [`SqliteVectorIndex`] keeps vectors as little-endian
//! `f32` BLOBs with their payload in a separate table. Both sit on a
//! shared bounded connection pool in WAL mode. Cosine similarity runs
//! in Rust over the stored BLOBs.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::{Chunk, Document, Source, SourceStatus, SourceType};

use super::{
    RelationalStore, ScoredVector, SearchFilter, TextHit, VectorIndex, VectorPayload, VectorQuery,
    VectorRecord,
};

/// Open (creating if missing) a SQLite database with a bounded pool.
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::Config(format!("cannot create db directory: {e}")))?;
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

/// Create the schema if it does not exist.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            source_type TEXT NOT NULL,
            uri TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            title TEXT,
            created_at INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            text TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            vector_ref TEXT,
            UNIQUE(document_id, content_hash),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
            chunk_id UNINDEXED,
            document_id UNINDEXED,
            text
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            source_id TEXT,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// SQLite implementation of [`RelationalStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        text: row.get("text"),
        token_count: row.get("token_count"),
        content_hash: row.get("content_hash"),
        vector_ref: row.get("vector_ref"),
    }
}

#[async_trait]
impl RelationalStore for SqliteStore {
    async fn register_source(&self, source: &Source) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, source_type, uri, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                uri = excluded.uri,
                status = excluded.status
            "#,
        )
        .bind(&source.id)
        .bind(source.source_type.as_str())
        .bind(&source.uri)
        .bind(source.status.as_str())
        .bind(source.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_source_status(&self, source_id: &str, status: SourceStatus) -> Result<()> {
        sqlx::query("UPDATE sources SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn source(&self, source_id: &str) -> Result<Option<Source>> {
        let row = sqlx::query(
            "SELECT id, source_type, uri, status, created_at FROM sources WHERE id = ?",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let source_type: String = r.get("source_type");
            let status: String = r.get("status");
            Source {
                id: r.get("id"),
                source_type: SourceType::parse(&source_type).unwrap_or(SourceType::Upload),
                uri: r.get("uri"),
                status: SourceStatus::parse(&status).unwrap_or(SourceStatus::Registered),
                created_at: r.get("created_at"),
            }
        }))
    }

    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, source_id, title, created_at, metadata_json)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.source_id)
        .bind(&doc.title)
        .bind(doc.created_at)
        .bind(doc.metadata.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn document(&self, document_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, source_id, title, created_at, metadata_json FROM documents WHERE id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let metadata_json: String = r.get("metadata_json");
            Document {
                id: r.get("id"),
                source_id: r.get("source_id"),
                title: r.get("title"),
                created_at: r.get("created_at"),
                metadata: serde_json::from_str(&metadata_json)
                    .unwrap_or(serde_json::json!({})),
            }
        }))
    }

    async fn insert_chunk(&self, chunk: &Chunk) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, text, token_count, content_hash, vector_ref)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                token_count = excluded.token_count,
                content_hash = excluded.content_hash,
                vector_ref = excluded.vector_ref
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(&chunk.text)
        .bind(chunk.token_count)
        .bind(&chunk.content_hash)
        .bind(&chunk.vector_ref)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(&chunk.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn chunk_by_hash(
        &self,
        document_id: &str,
        content_hash: &str,
    ) -> Result<Option<Chunk>> {
        let row = sqlx::query(
            r#"
            SELECT id, document_id, text, token_count, content_hash, vector_ref
            FROM chunks
            WHERE document_id = ? AND content_hash = ?
            "#,
        )
        .bind(document_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_chunk(&r)))
    }

    async fn fulltext_query(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<TextHit>> {
        let doc_filter = filter.and_then(|f| f.document_id.clone());
        let source_filter = filter.and_then(|f| f.source_id.clone());

        let rows = sqlx::query(
            r#"
            SELECT chunks_fts.chunk_id AS chunk_id, chunks_fts.document_id AS document_id,
                   rank, c.text AS text
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            JOIN documents d ON d.id = chunks_fts.document_id
            WHERE chunks_fts MATCH ?
              AND (? IS NULL OR chunks_fts.document_id = ?)
              AND (? IS NULL OR d.source_id = ?)
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(&doc_filter)
        .bind(&doc_filter)
        .bind(&source_filter)
        .bind(&source_filter)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let hits: Vec<TextHit> = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                TextHit {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    raw_rank: -rank, // negate so higher = better
                    text: row.get("text"),
                }
            })
            .collect();

        Ok(hits)
    }

    async fn chunk_count(&self, document_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

/// SQLite implementation of [`VectorIndex`].
///
/// Vectors are stored as little-endian `f32` BLOBs; queries are
/// brute-force cosine similarity over the (optionally pre-filtered)
/// candidate rows.
pub struct SqliteVectorIndex {
    pool: SqlitePool,
    dims: usize,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        for record in &records {
            if record.vector.len() != self.dims {
                return Err(Error::DimensionMismatch {
                    expected: self.dims,
                    actual: record.vector.len(),
                });
            }
        }

        for record in records {
            let blob = vec_to_blob(&record.vector);
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, document_id, source_id, content, metadata_json, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    document_id = excluded.document_id,
                    source_id = excluded.source_id,
                    content = excluded.content,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&record.id)
            .bind(&record.payload.document_id)
            .bind(&record.payload.source_id)
            .bind(&record.payload.content)
            .bind(record.payload.metadata.to_string())
            .bind(&blob)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn query(&self, query: &VectorQuery) -> Result<Vec<ScoredVector>> {
        if query.vector.len() != self.dims {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                actual: query.vector.len(),
            });
        }

        let doc_filter = query.filter.as_ref().and_then(|f| f.document_id.clone());
        let source_filter = query.filter.as_ref().and_then(|f| f.source_id.clone());

        let rows = sqlx::query(
            r#"
            SELECT chunk_id, document_id, source_id, content, metadata_json, embedding
            FROM chunk_vectors
            WHERE (? IS NULL OR document_id = ?)
              AND (? IS NULL OR source_id = ?)
            "#,
        )
        .bind(&doc_filter)
        .bind(&doc_filter)
        .bind(&source_filter)
        .bind(&source_filter)
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<ScoredVector> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                let similarity =
                    cosine_similarity(&query.vector, &vector).clamp(0.0, 1.0) as f64;
                let metadata_json: String = row.get("metadata_json");
                ScoredVector {
                    id: row.get("chunk_id"),
                    score: similarity,
                    payload: VectorPayload {
                        document_id: row.get("document_id"),
                        source_id: row.get("source_id"),
                        content: row.get("content"),
                        metadata: serde_json::from_str(&metadata_json)
                            .unwrap_or(serde_json::json!({})),
                    },
                }
            })
            .filter(|sv| sv.score >= query.min_score)
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(query.limit);

        Ok(scored)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn contains(&self, id: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE chunk_id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }
}
