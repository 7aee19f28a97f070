//! Retrieval tool: top-k chunks for a query, formatted for the model.
//!
//! Without an embedder, ranking is the store's keyword similarity. With
//! one, keyword and vector candidates are min-max normalized to `[0, 1]`
//! and merged as `(1 - alpha) * keyword + alpha * vector`, so a strategy
//! phrased with different words than the query can still rank. If the
//! query cannot be embedded, ranking falls back to keyword-only.
//!
//! [`search`] never fails. An empty ranking yields the configured
//! no-results message, and a store error becomes an explanatory string,
//! so the model can answer conversationally either way.

use std::collections::HashMap;

use anyhow::Result;
use tracing::{debug, warn};

use focus_coach_core::models::RankedChunk;
use focus_coach_core::store::ChunkStore;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, Embedder};

/// Separator placed between chunk texts in a result.
pub const SEPARATOR: &str = "\n---\n";

/// Vector side of a hybrid search.
#[derive(Clone, Copy)]
pub struct Semantic<'a> {
    pub embedder: &'a dyn Embedder,
    /// Weight of the vector score, in `[0, 1]`.
    pub alpha: f64,
    /// Candidates fetched from each ranking before merging.
    pub candidates: usize,
}

impl<'a> Semantic<'a> {
    pub fn new(embedder: &'a dyn Embedder, config: &RetrievalConfig) -> Self {
        Self {
            embedder,
            alpha: config.hybrid_alpha,
            candidates: config.candidate_k,
        }
    }
}

/// Min-max normalize scores to `[0, 1]`; all-equal scores become `1.0`.
fn normalize(hits: &[RankedChunk]) -> Vec<f64> {
    let min = hits.iter().map(|h| h.score).fold(f64::INFINITY, f64::min);
    let max = hits.iter().map(|h| h.score).fold(f64::NEG_INFINITY, f64::max);
    hits.iter()
        .map(|h| {
            if (max - min).abs() < f64::EPSILON {
                1.0
            } else {
                (h.score - min) / (max - min)
            }
        })
        .collect()
}

/// Merge keyword and vector candidates; ties go to the smaller chunk id.
fn merge(keyword: Vec<RankedChunk>, vector: Vec<RankedChunk>, alpha: f64, k: usize) -> Vec<RankedChunk> {
    let keyword_norm = normalize(&keyword);
    let vector_norm = normalize(&vector);

    let mut merged: HashMap<String, (RankedChunk, f64, f64)> = HashMap::new();
    for (hit, norm) in keyword.into_iter().zip(keyword_norm) {
        merged.insert(hit.chunk_id.clone(), (hit, norm, 0.0));
    }
    for (hit, norm) in vector.into_iter().zip(vector_norm) {
        merged
            .entry(hit.chunk_id.clone())
            .and_modify(|entry| entry.2 = norm)
            .or_insert((hit, 0.0, norm));
    }

    let mut ranked: Vec<RankedChunk> = merged
        .into_values()
        .map(|(mut hit, k_score, v_score)| {
            hit.score = (1.0 - alpha) * k_score + alpha * v_score;
            hit
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    ranked.truncate(k);
    ranked
}

/// Up to `k` chunks for `query`, best first.
pub async fn rank(
    store: &dyn ChunkStore,
    semantic: Option<Semantic<'_>>,
    query: &str,
    k: usize,
) -> Result<Vec<RankedChunk>> {
    let Some(semantic) = semantic else {
        return store.similarity_query(query, k).await;
    };

    let pool = semantic.candidates.max(k);
    let keyword = store.similarity_query(query, pool).await?;

    let vector = match embed_query(semantic.embedder, query).await {
        Ok(v) => {
            store
                .vector_query(semantic.embedder.model_name(), &v, pool)
                .await?
        }
        Err(e) => {
            warn!(error = %format!("{:#}", e), "query embedding failed, keyword ranking only");
            Vec::new()
        }
    };

    if vector.is_empty() {
        let mut keyword = keyword;
        keyword.truncate(k);
        return Ok(keyword);
    }
    debug!(keyword = keyword.len(), vector = vector.len(), "merging candidates");
    Ok(merge(keyword, vector, semantic.alpha, k))
}

pub async fn search(
    store: &dyn ChunkStore,
    semantic: Option<Semantic<'_>>,
    query: &str,
    k: usize,
    no_results_message: &str,
) -> String {
    if query.trim().is_empty() {
        return no_results_message.to_string();
    }

    match rank(store, semantic, query, k).await {
        Ok(hits) if hits.is_empty() => no_results_message.to_string(),
        Ok(hits) => hits
            .iter()
            .map(|h| h.text.as_str())
            .collect::<Vec<_>>()
            .join(SEPARATOR),
        Err(e) => {
            warn!(error = %e, "similarity query failed");
            format!("Search failed: {}", e)
        }
    }
}
