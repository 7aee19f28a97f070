//! In-memory [`ChunkStore`] implementation for tests.
//!
//! Chunks live in a `Vec` behind `std::sync::RwLock`, in insertion order.
//! Similarity is the number of query terms a chunk shares with the query;
//! ties keep insertion order. Chunks sharing no term are not returned.
//! Vectors sit in a map keyed by chunk id, next to the model that made them.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{query_terms, ChunkStore};
use crate::models::{DocumentChunk, RankedChunk};
use crate::vector::cosine_similarity;

/// In-memory store for tests.
pub struct InMemoryStore {
    chunks: RwLock<Vec<DocumentChunk>>,
    vectors: RwLock<HashMap<String, (String, Vec<f32>)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            vectors: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of every stored chunk, in insertion order.
    pub fn all(&self) -> Vec<DocumentChunk> {
        self.chunks
            .read()
            .map(|chunks| chunks.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn upsert(&self, chunk: &DocumentChunk) -> Result<()> {
        let mut chunks = self
            .chunks
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        match chunks.iter_mut().find(|c| c.id == chunk.id) {
            Some(existing) => *existing = chunk.clone(),
            None => chunks.push(chunk.clone()),
        }
        Ok(())
    }

    async fn ids_by_source(&self, source: &str) -> Result<Vec<String>> {
        let chunks = self
            .chunks
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        Ok(chunks
            .iter()
            .filter(|c| c.source == source)
            .map(|c| c.id.clone())
            .collect())
    }

    async fn similarity_query(&self, text: &str, k: usize) -> Result<Vec<RankedChunk>> {
        let terms = query_terms(text);
        if terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let chunks = self
            .chunks
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;

        let mut ranked: Vec<RankedChunk> = chunks
            .iter()
            .filter_map(|c| {
                let chunk_terms = query_terms(&c.text);
                let shared = terms.iter().filter(|t| chunk_terms.contains(t)).count();
                (shared > 0).then(|| RankedChunk {
                    chunk_id: c.id.clone(),
                    source: c.source.clone(),
                    text: c.text.clone(),
                    score: shared as f64,
                })
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(k);
        Ok(ranked)
    }

    async fn put_vectors(&self, model: &str, vectors: &[(String, Vec<f32>)]) -> Result<()> {
        let chunks = self
            .chunks
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        if let Some((id, _)) = vectors
            .iter()
            .find(|(id, _)| !chunks.iter().any(|c| &c.id == id))
        {
            bail!("no chunk with id '{}'", id);
        }
        let mut stored = self
            .vectors
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        for (id, vector) in vectors {
            stored.insert(id.clone(), (model.to_string(), vector.clone()));
        }
        Ok(())
    }

    async fn vector_query(
        &self,
        model: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RankedChunk>> {
        let chunks = self
            .chunks
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        let stored = self
            .vectors
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;

        let mut ranked: Vec<RankedChunk> = chunks
            .iter()
            .filter_map(|c| {
                let (m, v) = stored.get(&c.id)?;
                (m == model).then(|| RankedChunk {
                    chunk_id: c.id.clone(),
                    source: c.source.clone(),
                    text: c.text.clone(),
                    score: cosine_similarity(vector, v) as f64,
                })
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(k);
        Ok(ranked)
    }

    async fn missing_vectors(&self, model: &str, limit: usize) -> Result<Vec<DocumentChunk>> {
        let chunks = self
            .chunks
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        let stored = self
            .vectors
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        let mut missing: Vec<DocumentChunk> = chunks
            .iter()
            .filter(|c| !matches!(stored.get(&c.id), Some((m, _)) if m == model))
            .cloned()
            .collect();
        missing.sort_by(|a, b| a.id.cmp(&b.id));
        missing.truncate(limit);
        Ok(missing)
    }

    async fn count(&self) -> Result<usize> {
        let chunks = self
            .chunks
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        Ok(chunks.len())
    }
}
