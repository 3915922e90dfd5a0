//! Text indexing for cataloged reports.
//!
//! Pipeline for one report:
//!
//! ```text
//! file ──extract──▶ text ──split──▶ chunks ──embed (batched, retried)──▶ vectors
//!                                                                          │
//!          vector index ◀──upsert── points ◀──delete prior points ─────────┘
//! ```
//!
//! Failures never escape as errors: [`TextIndexer::index_report`] always
//! returns an [`IndexOutcome`], and the catalog record it was called for
//! stays in place either way.
//!
//! # Retry Strategy
//!
//! Each embedding batch gets up to `max_retries` attempts in total. After a
//! failed attempt `n` (0-based) the indexer sleeps `retry_base_delay × 2^n`
//! before trying again; there is no sleep after the last attempt.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::chunk::{Chunk, TextSplitter};
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::IndexError;
use crate::extract;
use crate::models::{CatalogRecord, ChunkPayload, VectorPoint};
use crate::vector::{point_id, VectorIndex, MAX_CHUNKS_PER_REPORT};

/// Tunables for [`TextIndexer`].
#[derive(Debug, Clone)]
pub struct IndexerSettings {
    pub min_text_chars: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub inter_batch_delay: Duration,
}

impl IndexerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_text_chars: config.chunking.min_text_chars,
            batch_size: config.embedding.batch_size.max(1),
            max_retries: config.embedding.max_retries.max(1),
            retry_base_delay: Duration::from_millis(config.embedding.retry_base_delay_ms),
            inter_batch_delay: Duration::from_millis(config.embedding.inter_batch_delay_ms),
        }
    }
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            min_text_chars: 100,
            batch_size: 100,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            inter_batch_delay: Duration::from_millis(500),
        }
    }
}

/// Statistics for a successfully indexed report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub report_id: i64,
    pub text_length: usize,
    pub chunks_count: usize,
    pub embeddings_count: usize,
    pub vector_dimension: usize,
}

#[derive(Debug)]
pub enum IndexOutcome {
    Indexed(IndexSummary),
    Failed { report_id: i64, error: IndexError },
}

impl IndexOutcome {
    pub fn is_indexed(&self) -> bool {
        matches!(self, IndexOutcome::Indexed(_))
    }
}

pub struct TextIndexer {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    splitter: TextSplitter,
    settings: IndexerSettings,
}

impl TextIndexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        splitter: TextSplitter,
        settings: IndexerSettings,
    ) -> Self {
        Self {
            embedder,
            index,
            splitter,
            settings,
        }
    }

    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self::new(
            embedder,
            index,
            TextSplitter::new(config.chunking.chunk_size, config.chunking.chunk_overlap),
            IndexerSettings::from_config(config),
        )
    }

    /// Make sure the vector collection exists. Call once before indexing.
    pub async fn prepare(&self) -> Result<(), IndexError> {
        self.index
            .ensure_collection(self.embedder.dims())
            .await
            .map_err(|e| IndexError::VectorIndex(format!("{:#}", e)))
    }

    /// Index the report file at `path` under the catalog `record`.
    pub async fn index_report(&self, record: &CatalogRecord, path: &Path) -> IndexOutcome {
        match self.try_index(record, path).await {
            Ok(summary) => {
                tracing::info!(
                    report_id = summary.report_id,
                    chunks = summary.chunks_count,
                    dims = summary.vector_dimension,
                    "report indexed"
                );
                IndexOutcome::Indexed(summary)
            }
            Err(error) => IndexOutcome::Failed {
                report_id: record.id,
                error,
            },
        }
    }

    async fn try_index(
        &self,
        record: &CatalogRecord,
        path: &Path,
    ) -> Result<IndexSummary, IndexError> {
        let text = extract::extract_file(path).await?;
        let text_length = text.trim().chars().count();
        if text_length < self.settings.min_text_chars {
            return Err(IndexError::TextTooShort(text_length));
        }

        let chunks = self.splitter.chunk_text(&text);
        if chunks.is_empty() {
            return Err(IndexError::NoChunks(text_length));
        }
        if chunks.len() > MAX_CHUNKS_PER_REPORT {
            return Err(IndexError::TooManyChunks(chunks.len()));
        }
        tracing::debug!(report_id = record.id, chunks = chunks.len(), "report chunked");

        let embeddings = self.embed_chunks(&chunks).await?;
        if embeddings.len() != chunks.len() {
            return Err(IndexError::EmbeddingCountMismatch {
                chunks: chunks.len(),
                embeddings: embeddings.len(),
            });
        }
        let vector_dimension = embeddings.first().map(|v| v.len()).unwrap_or(0);

        if let Err(e) = self.index.delete_report(record.id).await {
            tracing::warn!(report_id = record.id, error = %format!("{:#}", e), "failed to delete previous vectors");
        }

        let points = build_points(record, &chunks, embeddings)?;
        self.index
            .upsert(&points)
            .await
            .map_err(|e| IndexError::VectorIndex(format!("{:#}", e)))?;

        Ok(IndexSummary {
            report_id: record.id,
            text_length,
            chunks_count: chunks.len(),
            embeddings_count: points.len(),
            vector_dimension,
        })
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, IndexError> {
        let mut embeddings = Vec::with_capacity(chunks.len());
        for (batch_no, batch) in chunks.chunks(self.settings.batch_size).enumerate() {
            if batch_no > 0 && !self.settings.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.settings.inter_batch_delay).await;
            }
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embed_with_retry(batch_no, &texts).await?;
            if vectors.len() != texts.len() {
                return Err(IndexError::EmbeddingCountMismatch {
                    chunks: texts.len(),
                    embeddings: vectors.len(),
                });
            }
            embeddings.extend(vectors);
        }
        Ok(embeddings)
    }

    async fn embed_with_retry(
        &self,
        batch: usize,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, IndexError> {
        let attempts = self.settings.max_retries.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            match self.embedder.embed(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    tracing::warn!(
                        batch,
                        attempt = attempt + 1,
                        attempts,
                        error = %format!("{:#}", e),
                        "embedding attempt failed"
                    );
                    last_err = Some(e);
                }
            }
            if attempt + 1 < attempts {
                let delay = self
                    .settings
                    .retry_base_delay
                    .saturating_mul(2u32.saturating_pow(attempt));
                tokio::time::sleep(delay).await;
            }
        }

        Err(IndexError::Embedding {
            batch,
            attempts,
            message: last_err
                .map(|e| format!("{:#}", e))
                .unwrap_or_else(|| "no attempts made".to_string()),
        })
    }
}

fn build_points(
    record: &CatalogRecord,
    chunks: &[Chunk],
    embeddings: Vec<Vec<f32>>,
) -> Result<Vec<VectorPoint>, IndexError> {
    chunks
        .iter()
        .zip(embeddings)
        .map(|(chunk, vector)| {
            let id = point_id(record.id, chunk.index)
                .ok_or(IndexError::TooManyChunks(chunks.len()))?;
            Ok(VectorPoint {
                id,
                vector,
                payload: ChunkPayload {
                    report_id: record.id,
                    ticker: record.ticker.clone(),
                    year: record.year,
                    period: record.period.clone(),
                    chunk_index: chunk.index,
                    text: chunk.text.clone(),
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::InMemoryVectorIndex;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` calls, then returns unit vectors.
    struct FlakyEmbedder {
        failures: usize,
        calls: AtomicUsize,
        short_by: usize,
    }

    impl FlakyEmbedder {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                short_by: 0,
            }
        }
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        fn model_name(&self) -> &str {
            "flaky"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                bail!("rate limited");
            }
            let count = texts.len().saturating_sub(self.short_by);
            Ok(vec![vec![1.0, 0.0, 0.0, 0.0]; count])
        }
    }

    fn settings() -> IndexerSettings {
        IndexerSettings {
            min_text_chars: 100,
            batch_size: 2,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1),
            inter_batch_delay: Duration::ZERO,
        }
    }

    fn record(id: i64) -> CatalogRecord {
        CatalogRecord {
            id,
            ticker: "MOEX".to_string(),
            year: 2024,
            period: "6".to_string(),
            address: "mem://reports/moex/2024/6/report.txt".to_string(),
            created_at: 0,
        }
    }

    fn report_text() -> String {
        (0..6)
            .map(|i| format!("Section {}. {}", i, "Выручка и прибыль. ".repeat(8)))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    async fn indexer_with(
        embedder: Arc<FlakyEmbedder>,
        index: Arc<InMemoryVectorIndex>,
    ) -> TextIndexer {
        let indexer = TextIndexer::new(embedder, index, TextSplitter::new(200, 20), settings());
        indexer.prepare().await.unwrap();
        indexer
    }

    fn write_report(dir: &tempfile::TempDir, text: &str) -> std::path::PathBuf {
        let path = dir.path().join("report.txt");
        std::fs::write(&path, text).unwrap();
        path
    }

    #[tokio::test]
    async fn test_indexes_report_with_payload_and_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(&dir, &report_text());
        let embedder = Arc::new(FlakyEmbedder::new(0));
        let index = Arc::new(InMemoryVectorIndex::new());
        let indexer = indexer_with(embedder.clone(), index.clone()).await;

        let outcome = indexer.index_report(&record(7), &path).await;
        let IndexOutcome::Indexed(summary) = outcome else {
            panic!("expected indexed, got {:?}", outcome);
        };
        assert!(summary.chunks_count > 1);
        assert_eq!(summary.embeddings_count, summary.chunks_count);
        assert_eq!(summary.vector_dimension, 4);

        let points = index.points_for(7);
        assert_eq!(points.len(), summary.chunks_count);
        for (i, p) in points.iter().enumerate() {
            assert_eq!(p.id, 700_000 + i as u64);
            assert_eq!(p.payload.chunk_index, i);
            assert_eq!(p.payload.ticker, "MOEX");
            assert_eq!(p.payload.period, "6");
        }
        // One call per batch of two chunks.
        assert_eq!(embedder.calls(), summary.chunks_count.div_ceil(2));
    }

    #[tokio::test]
    async fn test_reindex_replaces_points() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(InMemoryVectorIndex::new());
        let indexer = indexer_with(Arc::new(FlakyEmbedder::new(0)), index.clone()).await;

        let long = write_report(&dir, &report_text());
        assert!(indexer.index_report(&record(3), &long).await.is_indexed());
        let before = index.points_for(3).len();

        let short = write_report(&dir, &"Короткий отчёт. ".repeat(10));
        assert!(indexer.index_report(&record(3), &short).await.is_indexed());
        let after = index.points_for(3).len();
        assert!(after < before);
        assert_eq!(index.len(), after);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_two_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(&dir, &"Операционные доходы выросли. ".repeat(5));
        let embedder = Arc::new(FlakyEmbedder::new(2));
        let index = Arc::new(InMemoryVectorIndex::new());
        let indexer = indexer_with(embedder.clone(), index.clone()).await;

        let outcome = indexer.index_report(&record(1), &path).await;
        assert!(outcome.is_indexed(), "{:?}", outcome);
        assert_eq!(embedder.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_fails_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(&dir, &report_text());
        let embedder = Arc::new(FlakyEmbedder::new(usize::MAX));
        let index = Arc::new(InMemoryVectorIndex::new());
        let indexer = indexer_with(embedder.clone(), index.clone()).await;

        let outcome = indexer.index_report(&record(2), &path).await;
        match outcome {
            IndexOutcome::Failed {
                report_id,
                error: IndexError::Embedding { batch, attempts, .. },
            } => {
                assert_eq!(report_id, 2);
                assert_eq!(batch, 0);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(embedder.calls(), 3);
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_short_text_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(&dir, "   too short   ");
        let embedder = Arc::new(FlakyEmbedder::new(0));
        let indexer = indexer_with(embedder.clone(), Arc::new(InMemoryVectorIndex::new())).await;

        let outcome = indexer.index_report(&record(4), &path).await;
        assert!(matches!(
            outcome,
            IndexOutcome::Failed {
                error: IndexError::TextTooShort(9),
                ..
            }
        ));
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_count_mismatch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(&dir, &report_text());
        let embedder = Arc::new(FlakyEmbedder {
            short_by: 1,
            ..FlakyEmbedder::new(0)
        });
        let indexer = indexer_with(embedder, Arc::new(InMemoryVectorIndex::new())).await;

        let outcome = indexer.index_report(&record(5), &path).await;
        assert!(matches!(
            outcome,
            IndexOutcome::Failed {
                error: IndexError::EmbeddingCountMismatch { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_chunk_ceiling_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(&dir, &"x".repeat(MAX_CHUNKS_PER_REPORT + 1));
        let embedder = Arc::new(FlakyEmbedder::new(0));
        let indexer = TextIndexer::new(
            embedder.clone(),
            Arc::new(InMemoryVectorIndex::new()),
            TextSplitter::new(1, 0),
            settings(),
        );

        let outcome = indexer.index_report(&record(6), &path).await;
        assert!(matches!(
            outcome,
            IndexOutcome::Failed {
                error: IndexError::TooManyChunks(n),
                ..
            } if n == MAX_CHUNKS_PER_REPORT + 1
        ));
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_delete_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(&dir, &report_text());
        let index = Arc::new(InMemoryVectorIndex::with_failing_deletes());
        let indexer = indexer_with(Arc::new(FlakyEmbedder::new(0)), index.clone()).await;

        assert!(indexer.index_report(&record(8), &path).await.is_indexed());
        assert!(!index.is_empty());
    }
}
