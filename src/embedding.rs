//! Embedding providers for semantic retrieval.
//!
//! [`Embedder`] turns texts into vectors. [`HttpEmbedder`] talks to either
//! a local Ollama instance (`POST /api/embed`) or an OpenAI-compatible
//! `/embeddings` endpoint. [`create_embedder`] picks one from the
//! `[embedding]` config section and returns `None` when embeddings are
//! disabled, in which case retrieval stays keyword-only.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx: retry
//! - any other 4xx: fail immediately
//! - network errors: retry
//! - backoff: 1s, 2s, 4s, ... capped at 32s

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use focus_coach_core::models::DocumentChunk;
use focus_coach_core::store::ChunkStore;

use crate::config::EmbeddingConfig;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier; stored next to every vector it produces.
    fn model_name(&self) -> &str;

    fn dims(&self) -> usize;

    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Api {
    Ollama,
    OpenAi,
}

pub struct HttpEmbedder {
    api: Api,
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    api_key: Option<String>,
    max_retries: u32,
    backoff_base: Duration,
}

impl HttpEmbedder {
    fn build(api: Api, config: &EmbeddingConfig, default_url: &str, path: &str) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for provider '{}'", config.provider))?;
        let dims = config
            .dims
            .filter(|d| *d > 0)
            .ok_or_else(|| anyhow!("embedding.dims required for provider '{}'", config.provider))?;
        let url = config.url.as_deref().unwrap_or(default_url);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        let api_key = match api {
            Api::Ollama => None,
            Api::OpenAi => Some(std::env::var(&config.api_key_env).with_context(|| {
                format!("{} environment variable not set", config.api_key_env)
            })?),
        };

        Ok(Self {
            api,
            client,
            endpoint: format!("{}{}", url.trim_end_matches('/'), path),
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Local Ollama, `<url>/api/embed`. `url` defaults to `http://localhost:11434`.
    pub fn ollama(config: &EmbeddingConfig) -> Result<Self> {
        Self::build(Api::Ollama, config, "http://localhost:11434", "/api/embed")
    }

    /// OpenAI-compatible, `<url>/embeddings`. `url` defaults to
    /// `https://api.openai.com/v1`; the key comes from `api_key_env`.
    pub fn openai(config: &EmbeddingConfig) -> Result<Self> {
        Self::build(Api::OpenAi, config, "https://api.openai.com/v1", "/embeddings")
    }

    /// Scale the retry backoff; the default base is one second.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(5))
    }

    fn parse(&self, json: &Value, expected: usize) -> Result<Vec<Vec<f32>>> {
        let vectors = match self.api {
            Api::Ollama => parse_ollama_response(json)?,
            Api::OpenAi => parse_openai_response(json)?,
        };
        if vectors.len() != expected {
            bail!(
                "Embedding response has {} vectors for {} texts",
                vectors.len(),
                expected
            );
        }
        if let Some(v) = vectors.iter().find(|v| v.len() != self.dims) {
            bail!(
                "Embedding model '{}' returned {} dims, config says {}",
                self.model,
                v.len(),
                self.dims
            );
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response
                            .json()
                            .await
                            .context("Invalid embedding response")?;
                        return self.parse(&json, texts.len());
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("Embedding API error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("Embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow::Error::new(e).context(format!(
                        "Failed to reach embedding endpoint {}",
                        self.endpoint
                    )));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Embedding failed after retries")))
    }
}

fn number_array(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// `{"embeddings": [[...], ...]}`
fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|e| {
            number_array(e).ok_or_else(|| anyhow!("Invalid Ollama response: bad embedding"))
        })
        .collect()
}

/// `{"data": [{"index": 0, "embedding": [...]}, ...]}`, put back in index order.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(position, |i| i as usize);
        let vector = item
            .get("embedding")
            .and_then(number_array)
            .ok_or_else(|| anyhow!("Invalid OpenAI response: bad embedding"))?;
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// The configured embedder, or `None` when `provider = "disabled"`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Arc<dyn Embedder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "ollama" => Ok(Some(Arc::new(HttpEmbedder::ollama(config)?))),
        "openai" => Ok(Some(Arc::new(HttpEmbedder::openai(config)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed `chunks` in batches of `batch_size` and store their vectors.
/// Stops at the first failing batch; earlier batches stay stored.
pub async fn embed_chunks(
    store: &dyn ChunkStore,
    embedder: &dyn Embedder,
    chunks: &[DocumentChunk],
    batch_size: usize,
) -> Result<usize> {
    let mut stored = 0;
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        let pairs: Vec<(String, Vec<f32>)> = batch
            .iter()
            .map(|c| c.id.clone())
            .zip(vectors)
            .collect();
        store.put_vectors(embedder.model_name(), &pairs).await?;
        stored += pairs.len();
    }
    Ok(stored)
}

/// Outcome of [`embed_pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbedReport {
    pub pending: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// Embed every stored chunk that has no vector from the current model.
///
/// A failing batch is logged and counted; the remaining batches still run.
pub async fn embed_pending(
    store: &dyn ChunkStore,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<EmbedReport> {
    let pending = store
        .missing_vectors(embedder.model_name(), usize::MAX)
        .await?;
    let mut report = EmbedReport {
        pending: pending.len(),
        ..EmbedReport::default()
    };

    for batch in pending.chunks(batch_size.max(1)) {
        match embed_chunks(store, embedder, batch, batch.len()).await {
            Ok(n) => report.embedded += n,
            Err(e) => {
                warn!(error = %format!("{:#}", e), chunks = batch.len(), "embedding batch failed");
                report.failed += batch.len();
            }
        }
    }

    info!(
        model = embedder.model_name(),
        pending = report.pending,
        embedded = report.embedded,
        failed = report.failed,
        "embed pending finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use focus_coach_core::chunk::chunk_lines;
    use focus_coach_core::store::memory::InMemoryStore;

    /// Maps a few keywords onto fixed axes.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keywords"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("boom")) {
                bail!("model crashed");
            }
            Ok(texts
                .iter()
                .map(|t| vec![t.matches("rest").count() as f32, t.len() as f32])
                .collect())
        }
    }

    fn config(provider: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(3),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_disabled_provider_is_none() {
        assert!(create_embedder(&EmbeddingConfig::default()).unwrap().is_none());
        assert!(create_embedder(&config("ollama")).unwrap().is_some());
        assert!(create_embedder(&config("word2vec")).is_err());
    }

    #[test]
    fn test_ollama_endpoint_and_parse() {
        let mut cfg = config("ollama");
        cfg.url = Some("http://127.0.0.1:11434/".to_string());
        let e = HttpEmbedder::ollama(&cfg).unwrap();
        assert_eq!(e.endpoint, "http://127.0.0.1:11434/api/embed");

        let ok = json!({ "embeddings": [[0.1, 0.2, 0.3]] });
        assert_eq!(e.parse(&ok, 1).unwrap().len(), 1);

        let wrong_dims = json!({ "embeddings": [[0.1, 0.2]] });
        assert!(e.parse(&wrong_dims, 1).unwrap_err().to_string().contains("dims"));

        let wrong_count = json!({ "embeddings": [[0.1, 0.2, 0.3]] });
        assert!(e.parse(&wrong_count, 2).is_err());
    }

    #[test]
    fn test_openai_response_sorted_by_index() {
        let json = json!({ "data": [
            { "index": 1, "embedding": [2.0] },
            { "index": 0, "embedding": [1.0] }
        ]});
        assert_eq!(parse_openai_response(&json).unwrap(), vec![vec![1.0], vec![2.0]]);
        assert!(parse_openai_response(&json!({ "data": [{ "embedding": "x" }] })).is_err());
    }

    #[test]
    fn test_model_and_dims_required() {
        let mut cfg = config("ollama");
        cfg.dims = None;
        assert!(HttpEmbedder::ollama(&cfg).is_err());
        cfg.dims = Some(3);
        cfg.model = None;
        assert!(HttpEmbedder::ollama(&cfg).is_err());
    }

    #[test]
    fn test_backoff_saturates() {
        let e = HttpEmbedder::ollama(&config("ollama"))
            .unwrap()
            .with_backoff_base(Duration::from_millis(10));
        assert_eq!(e.backoff(1), Duration::from_millis(10));
        assert_eq!(e.backoff(3), Duration::from_millis(40));
        assert_eq!(e.backoff(u32::MAX), Duration::from_millis(320));
    }

    #[tokio::test]
    async fn test_embed_pending_counts_failed_batches() {
        let store = InMemoryStore::new();
        store
            .upsert_all(&chunk_lines("a.txt", "rest often\nboom\nrest"))
            .await
            .unwrap();

        let report = embed_pending(&store, &KeywordEmbedder, 1).await.unwrap();
        assert_eq!(
            report,
            EmbedReport {
                pending: 3,
                embedded: 2,
                failed: 1
            }
        );
        let missing = store.missing_vectors("keywords", 10).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].text, "boom");
    }
}
