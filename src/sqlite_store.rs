//! SQLite-backed [`ChunkStore`] implementation.
//!
//! Chunks live in the `chunks` table with a mirror row in the `chunks_fts`
//! FTS5 table. Keyword similarity is FTS5 `rank` (bm25); the query text is
//! reduced to quoted terms joined with `OR`, so user text never reaches the
//! FTS parser as syntax.
//!
//! Embedding vectors live in `chunk_vectors` as little-endian `f32` blobs.
//! Vector similarity loads the vectors of one model and computes cosine
//! similarity in Rust; a coaching knowledge base is small enough for that.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use focus_coach_core::models::{DocumentChunk, RankedChunk};
use focus_coach_core::store::{query_terms, ChunkStore};
use focus_coach_core::vector::{blob_to_vec, cosine_similarity, vec_to_blob};

use crate::config::Config;
use crate::{db, migrate};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database, creating the schema if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// `"term1" OR "term2" ...`, or `None` when the text has no searchable terms.
fn fts_match_expr(text: &str) -> Option<String> {
    let terms = query_terms(text);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

async fn write_chunk(tx: &mut Transaction<'_, Sqlite>, chunk: &DocumentChunk, now: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chunks (id, source, chunk_index, text, hash, indexed_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            source = excluded.source,
            chunk_index = excluded.chunk_index,
            text = excluded.text,
            hash = excluded.hash,
            indexed_at = excluded.indexed_at
        "#,
    )
    .bind(&chunk.id)
    .bind(&chunk.source)
    .bind(chunk.chunk_index)
    .bind(&chunk.text)
    .bind(&chunk.hash)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
        .bind(&chunk.id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("INSERT INTO chunks_fts (chunk_id, source, text) VALUES (?, ?, ?)")
        .bind(&chunk.id)
        .bind(&chunk.source)
        .bind(&chunk.text)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn upsert(&self, chunk: &DocumentChunk) -> Result<()> {
        self.upsert_all(std::slice::from_ref(chunk)).await
    }

    /// All chunks in one transaction.
    async fn upsert_all(&self, chunks: &[DocumentChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            write_chunk(&mut tx, chunk, now).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn ids_by_source(&self, source: &str) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM chunks WHERE source = ? ORDER BY chunk_index")
                .bind(source)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    async fn similarity_query(&self, text: &str, k: usize) -> Result<Vec<RankedChunk>> {
        let Some(expr) = fts_match_expr(text) else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT chunk_id, source, text, rank
            FROM chunks_fts
            WHERE chunks_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&expr)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                RankedChunk {
                    chunk_id: row.get("chunk_id"),
                    source: row.get("source"),
                    text: row.get("text"),
                    score: -rank,
                }
            })
            .collect())
    }

    /// All vectors in one transaction; an unknown chunk id fails the batch.
    async fn put_vectors(&self, model: &str, vectors: &[(String, Vec<f32>)]) -> Result<()> {
        if vectors.is_empty() {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for (chunk_id, vector) in vectors {
            let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE id = ?")
                .bind(chunk_id)
                .fetch_one(&mut *tx)
                .await?;
            if known == 0 {
                bail!("no chunk with id '{}'", chunk_id);
            }
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, model, dims, embedding, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    model = excluded.model,
                    dims = excluded.dims,
                    embedding = excluded.embedding,
                    created_at = excluded.created_at
                "#,
            )
            .bind(chunk_id)
            .bind(model)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn vector_query(
        &self,
        model: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RankedChunk>> {
        if k == 0 || vector.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.embedding, c.source, c.text
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE cv.model = ? AND cv.dims = ?
            ORDER BY cv.chunk_id
            "#,
        )
        .bind(model)
        .bind(vector.len() as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut ranked: Vec<RankedChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                RankedChunk {
                    chunk_id: row.get("chunk_id"),
                    source: row.get("source"),
                    text: row.get("text"),
                    score: cosine_similarity(vector, &blob_to_vec(&blob)) as f64,
                }
            })
            .collect();
        // Stable: equal scores stay in chunk id order.
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(k);
        Ok(ranked)
    }

    async fn missing_vectors(&self, model: &str, limit: usize) -> Result<Vec<DocumentChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.source, c.chunk_index, c.text, c.hash
            FROM chunks c
            LEFT JOIN chunk_vectors cv ON cv.chunk_id = c.id AND cv.model = ?
            WHERE cv.chunk_id IS NULL
            ORDER BY c.id
            LIMIT ?
            "#,
        )
        .bind(model)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| DocumentChunk {
                id: row.get("id"),
                source: row.get("source"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                hash: row.get("hash"),
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fts_match_expr_quotes_terms() {
        assert_eq!(
            fts_match_expr("break AND \"focus\"*").as_deref(),
            Some("\"break\" OR \"and\" OR \"focus\"")
        );
        assert!(fts_match_expr("--- ?").is_none());
    }
}
