//! Ingestion pipeline.
//!
//! One file in, zero or more chunks out:
//!
//! 1. Ignore directories and basenames outside `watch.include_globs`.
//! 2. Skip the file if the store already holds any chunk whose `source`
//!    is the file's basename. This is the only de-duplication: a file
//!    edited under the same name is not re-indexed.
//! 3. Read the file as strict UTF-8 and split it into non-blank lines. A
//!    file with any invalid byte is rejected before anything is written.
//! 4. Persist every chunk in one batch, so a failure leaves nothing
//!    behind for the dedup check to trip over.
//! 5. With an embedder configured, embed the new chunks and store their
//!    vectors. An embedding failure only logs a warning: the chunks stay
//!    searchable by keyword and `coach embed` fills in the vectors later.
//!
//! The directory watcher that feeds this pipeline lives in [`crate::watch`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};

use focus_coach_core::chunk::chunk_lines;
use focus_coach_core::sanitize::sanitize;
use focus_coach_core::store::ChunkStore;

use crate::config::Config;
use crate::embedding::{self, Embedder};

/// What [`IngestPipeline::process_file`] did with a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New source; `chunks` chunks were persisted.
    Indexed { source: String, chunks: usize },
    /// Chunks for this basename already exist; nothing was written.
    AlreadyIndexed { source: String },
    /// A directory, or a file the include globs do not match.
    Ignored { path: PathBuf },
}

pub struct IngestPipeline {
    store: Arc<dyn ChunkStore>,
    include: GlobSet,
    embedder: Option<Arc<dyn Embedder>>,
    batch_size: usize,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn ChunkStore>, include_globs: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in include_globs {
            builder.add(Glob::new(pattern).with_context(|| format!("invalid glob '{}'", pattern))?);
        }
        Ok(Self {
            store,
            include: builder.build()?,
            embedder: None,
            batch_size: 32,
        })
    }

    pub fn from_config(config: &Config, store: Arc<dyn ChunkStore>) -> Result<Self> {
        let embedder = embedding::create_embedder(&config.embedding)?;
        Ok(Self::new(store, &config.watch.include_globs)?
            .with_embedder(embedder, config.embedding.batch_size))
    }

    pub fn with_embedder(mut self, embedder: Option<Arc<dyn Embedder>>, batch_size: usize) -> Self {
        self.embedder = embedder;
        self.batch_size = batch_size;
        self
    }

    /// Basename of `path` when it passes the include globs.
    fn source_name(&self, path: &Path) -> Option<String> {
        let name = path.file_name()?.to_string_lossy();
        if self.include.is_match(name.as_ref()) {
            Some(sanitize(&name))
        } else {
            None
        }
    }

    pub async fn process_file(&self, path: &Path) -> Result<IngestOutcome> {
        if path.is_dir() {
            return Ok(IngestOutcome::Ignored {
                path: path.to_path_buf(),
            });
        }
        let Some(source) = self.source_name(path) else {
            debug!(path = %path.display(), "ignoring file outside include globs");
            return Ok(IngestOutcome::Ignored {
                path: path.to_path_buf(),
            });
        };

        let existing = self
            .store
            .ids_by_source(&source)
            .await
            .with_context(|| format!("dedup check failed for '{}'", source))?;
        if !existing.is_empty() {
            info!(source = %source, "already indexed, skipping");
            return Ok(IngestOutcome::AlreadyIndexed { source });
        }

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => bail!(
                "{} is not valid UTF-8 (invalid byte at offset {})",
                path.display(),
                e.utf8_error().valid_up_to()
            ),
        };

        let chunks = chunk_lines(&source, &text);
        self.store
            .upsert_all(&chunks)
            .await
            .with_context(|| format!("Failed to store chunks for '{}'", source))?;

        if let Some(embedder) = &self.embedder {
            match embedding::embed_chunks(&*self.store, &**embedder, &chunks, self.batch_size).await {
                Ok(n) => debug!(source = %source, vectors = n, "embedded"),
                Err(e) => warn!(
                    source = %source,
                    error = %format!("{:#}", e),
                    "embedding failed, chunks stored without vectors"
                ),
            }
        }

        info!(source = %source, chunks = chunks.len(), "indexed");
        Ok(IngestOutcome::Indexed {
            source,
            chunks: chunks.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use focus_coach_core::store::memory::InMemoryStore;

    fn pipeline(store: Arc<InMemoryStore>) -> IngestPipeline {
        IngestPipeline::new(store, &["*.txt".to_string()]).unwrap()
    }

    #[tokio::test]
    async fn test_indexes_then_skips_same_basename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tips.txt");
        std::fs::write(&path, "Take a 5-minute break\n\nWrite down your top 3 tasks\n").unwrap();

        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(store.clone());

        assert_eq!(
            p.process_file(&path).await.unwrap(),
            IngestOutcome::Indexed {
                source: "tips.txt".into(),
                chunks: 2
            }
        );
        assert_eq!(
            p.process_file(&path).await.unwrap(),
            IngestOutcome::AlreadyIndexed {
                source: "tips.txt".into()
            }
        );
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ignores_directories_and_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let md = dir.path().join("notes.md");
        std::fs::write(&md, "hello").unwrap();
        let sub = dir.path().join("nested.txt");
        std::fs::create_dir(&sub).unwrap();

        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(store.clone());
        assert!(matches!(p.process_file(&md).await.unwrap(), IngestOutcome::Ignored { .. }));
        assert!(matches!(p.process_file(&sub).await.unwrap(), IngestOutcome::Ignored { .. }));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    struct LengthEmbedder {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Embedder for LengthEmbedder {
        fn model_name(&self) -> &str {
            "length"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                bail!("embedding server down");
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    #[tokio::test]
    async fn test_new_chunks_get_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tips.txt");
        std::fs::write(&path, "Stretch
Drink some water
Stand up
").unwrap();

        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(store.clone())
            .with_embedder(Some(Arc::new(LengthEmbedder { fail: false })), 2);
        p.process_file(&path).await.unwrap();

        assert!(store.missing_vectors("length", 10).await.unwrap().is_empty());
        let hits = store.vector_query("length", &[1.0], 3).await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_embedding_failure_still_indexes_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tips.txt");
        std::fs::write(&path, "Stretch
Stand up
").unwrap();

        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(store.clone())
            .with_embedder(Some(Arc::new(LengthEmbedder { fail: true })), 8);
        assert!(matches!(
            p.process_file(&path).await.unwrap(),
            IngestOutcome::Indexed { chunks: 2, .. }
        ));
        assert_eq!(store.missing_vectors("length", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_single_invalid_byte_rejects_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tips.txt");
        std::fs::write(&path, b"Take a 5-minute break\nWrite \xff down tasks\n").unwrap();

        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(store.clone());
        let err = p.process_file(&path).await.unwrap_err();
        assert!(err.to_string().contains("not valid UTF-8"), "{}", err);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.ids_by_source("tips.txt").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_utf8_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.txt");
        std::fs::write(&path, [0xff, 0xfe, 0xff, 0xc0]).unwrap();

        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(store.clone());
        assert!(p.process_file(&path).await.is_err());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
