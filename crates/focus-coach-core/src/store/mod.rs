//! Storage abstraction for indexed chunks.
//!
//! The [`ChunkStore`] trait is the only contract the ingestion pipeline and
//! the retrieval tool depend on. The SQLite-backed implementation lives in
//! the `focus-coach` crate; [`memory::InMemoryStore`] serves tests.
//!
//! Implementations must be `Send + Sync`: the ingestion task writes while
//! chat sessions read, without any coordination from the caller.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert`](ChunkStore::upsert) | Insert or replace one chunk |
//! | [`upsert_all`](ChunkStore::upsert_all) | Insert a batch; all or nothing where supported |
//! | [`ids_by_source`](ChunkStore::ids_by_source) | Chunk ids whose `source` metadata matches |
//! | [`similarity_query`](ChunkStore::similarity_query) | Top-k chunks for a text query (keyword) |
//! | [`put_vectors`](ChunkStore::put_vectors) | Attach embedding vectors to stored chunks |
//! | [`vector_query`](ChunkStore::vector_query) | Top-k chunks by cosine similarity |
//! | [`missing_vectors`](ChunkStore::missing_vectors) | Chunks with no vector for a model |
//! | [`count`](ChunkStore::count) | Number of stored chunks |
//!
//! Vectors are keyed by chunk id and tagged with the embedding model that
//! produced them; a query only compares vectors from the same model. The
//! vector methods have defaults for backends that hold no vectors.

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{DocumentChunk, RankedChunk};

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Insert a chunk, replacing any chunk with the same id.
    async fn upsert(&self, chunk: &DocumentChunk) -> Result<()>;

    /// Insert several chunks.
    ///
    /// The default inserts one at a time. Backends with transactions
    /// override this so a failure leaves none of the batch behind.
    async fn upsert_all(&self, chunks: &[DocumentChunk]) -> Result<()> {
        for chunk in chunks {
            self.upsert(chunk).await?;
        }
        Ok(())
    }

    /// Ids of every chunk whose `source` equals `source`.
    async fn ids_by_source(&self, source: &str) -> Result<Vec<String>>;

    /// Up to `k` chunks ranked by similarity to `text`, best first.
    async fn similarity_query(&self, text: &str, k: usize) -> Result<Vec<RankedChunk>>;

    /// Store one vector per chunk id from `model`, replacing older ones.
    async fn put_vectors(&self, model: &str, vectors: &[(String, Vec<f32>)]) -> Result<()> {
        let _ = (model, vectors);
        bail!("this store does not hold embedding vectors")
    }

    /// Up to `k` chunks ranked by cosine similarity between `vector` and
    /// their `model` vector, best first. Chunks without one are skipped.
    async fn vector_query(
        &self,
        model: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RankedChunk>> {
        let _ = (model, vector, k);
        Ok(Vec::new())
    }

    /// Up to `limit` chunks that have no vector from `model`, by id.
    async fn missing_vectors(&self, model: &str, limit: usize) -> Result<Vec<DocumentChunk>> {
        let _ = (model, limit);
        Ok(Vec::new())
    }

    /// Total number of stored chunks.
    async fn count(&self) -> Result<usize>;
}

/// Lowercased alphanumeric terms of a query, in order, without duplicates.
///
/// Shared by the store backends so that arbitrary user text (quotes,
/// operators, punctuation) is reduced to plain search terms.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        let term = raw.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}
