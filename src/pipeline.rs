//! Pipeline orchestration.
//!
//! Drives companies through the full flow, one company and one document at
//! a time:
//!
//! ```text
//! search ─▶ fetch ─▶ [downloaded only] ─▶ normalize period ─▶ probe blob
//!        ─▶ publish ─▶ catalog ─▶ index (unless deferred)
//! ```
//!
//! Every document ends in a [`DocumentOutcome`]; nothing a single document
//! does can abort its company, and nothing a single company does can abort
//! the batch. Company-level failures are collected into
//! [`BatchResult::errors`] keyed by legal id.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::Instrument;

use crate::blob::{self, BlobStore, InMemoryBlobStore, ReportArchive, S3BlobStore};
use crate::catalog::{Catalog, CreateOutcome, SqliteCatalog};
use crate::config::Config;
use crate::embedding::create_provider;
use crate::error::{CatalogError, CompanyError, PeriodParseError, PublishError};
use crate::indexer::{IndexOutcome, TextIndexer};
use crate::models::{BatchError, BatchResult, CandidateDocument, CatalogRecord, Company, IssuerMatch};
use crate::period::normalize_period;
use crate::source::DisclosureSource;
use crate::vector::create_index;

/// Matches logged per search.
const LOGGED_MATCHES: usize = 5;

/// Whether newly cataloged reports are indexed in the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    Inline,
    /// Leave indexing to a later pass (queue-triggered runs).
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// An artifact already sits under the report's blob key.
    AlreadyPublished { address: String },
    /// The catalog already holds `(ticker, year, period)`.
    AlreadyCataloged,
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("downloaded entry '{0}' has no local file")]
    MissingFile(String),

    #[error(transparent)]
    Period(#[from] PeriodParseError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Result of running one candidate document through the pipeline.
#[derive(Debug)]
pub enum DocumentOutcome {
    Saved {
        record: CatalogRecord,
        /// `None` when indexing was deferred or unavailable.
        index: Option<IndexOutcome>,
    },
    Skipped(SkipReason),
    Failed(DocumentError),
}

impl DocumentOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, DocumentOutcome::Saved { .. })
    }
}

/// Everything that happened for one company.
#[derive(Debug)]
pub struct CompanyReport {
    pub ticker: String,
    pub issuer: IssuerMatch,
    pub candidates: usize,
    pub downloaded: usize,
    /// Names of files the crawler failed to download.
    pub crawler_errors: Vec<String>,
    pub outcomes: Vec<DocumentOutcome>,
}

impl CompanyReport {
    pub fn saved(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_saved()).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub delay_between_companies: Duration,
    pub max_reports_per_company: Option<usize>,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            delay_between_companies: Duration::from_millis(
                config.crawler.delay_between_companies_ms,
            ),
            max_reports_per_company: config.crawler.max_reports_per_company,
        }
    }
}

pub struct Pipeline {
    archive: ReportArchive,
    catalog: Arc<dyn Catalog>,
    indexer: Option<TextIndexer>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(archive: ReportArchive, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            archive,
            catalog,
            indexer: None,
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_indexer(mut self, indexer: TextIndexer) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Wire up the configured backends over an already migrated pool.
    pub fn from_config(config: &Config, pool: SqlitePool) -> Result<Self> {
        let store: Arc<dyn BlobStore> = match config.storage.backend.as_str() {
            "memory" => Arc::new(InMemoryBlobStore::new(format!(
                "memory://{}",
                config.storage.bucket
            ))),
            _ => Arc::new(S3BlobStore::from_config(&config.storage)?),
        };
        let mut pipeline = Self::new(
            ReportArchive::new(store),
            Arc::new(SqliteCatalog::new(pool)),
        )
        .with_settings(PipelineSettings::from_config(config));

        if config.embedding.is_enabled() {
            let indexer = TextIndexer::from_config(
                config,
                create_provider(&config.embedding)?,
                create_index(&config.vector)?,
            );
            pipeline = pipeline.with_indexer(indexer);
        }
        Ok(pipeline)
    }

    /// Process every company in order and aggregate the result.
    pub async fn run_batch(
        &self,
        companies: &[Company],
        source: &mut dyn DisclosureSource,
    ) -> BatchResult {
        tracing::info!(companies = companies.len(), "batch started");
        let index = self.prepare_indexing(IndexMode::Inline).await;
        let mut result = BatchResult::default();

        for (i, company) in companies.iter().enumerate() {
            if i > 0 && !self.settings.delay_between_companies.is_zero() {
                tokio::time::sleep(self.settings.delay_between_companies).await;
            }
            match self
                .process_company(source, &company.legal_id, &company.ticker, index)
                .instrument(tracing::info_span!("company", ticker = %company.ticker))
                .await
            {
                Ok(report) => {
                    result.processed += 1;
                    result.saved += report.saved();
                }
                Err(e) => {
                    tracing::error!(ticker = %company.ticker, legal_id = %company.legal_id, error = %e, "company failed");
                    result.errors.push(BatchError {
                        key: company.legal_id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            processed = result.processed,
            saved = result.saved,
            errors = result.errors.len(),
            "batch finished"
        );
        result
    }

    /// Process a single company found by `query` (legal id or name).
    pub async fn run_company(
        &self,
        source: &mut dyn DisclosureSource,
        query: &str,
        ticker: &str,
        mode: IndexMode,
    ) -> BatchResult {
        let index = self.prepare_indexing(mode).await;
        let mut result = BatchResult::default();
        match self.process_company(source, query, ticker, index).await {
            Ok(report) => {
                result.processed = 1;
                result.saved = report.saved();
            }
            Err(e) => {
                tracing::error!(%ticker, %query, error = %e, "company failed");
                result.errors.push(BatchError {
                    key: query.to_string(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    /// Whether to index in this run. Collection setup failures disable
    /// indexing for the run; publishing and cataloging continue.
    async fn prepare_indexing(&self, mode: IndexMode) -> bool {
        let Some(indexer) = self.indexer.as_ref() else {
            return false;
        };
        if mode == IndexMode::Deferred {
            return false;
        }
        match indexer.prepare().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "vector index unavailable, indexing disabled for this run");
                false
            }
        }
    }

    pub async fn process_company(
        &self,
        source: &mut dyn DisclosureSource,
        query: &str,
        ticker: &str,
        index: bool,
    ) -> Result<CompanyReport, CompanyError> {
        tracing::info!(%ticker, %query, "searching issuer");
        let matches = source
            .search(query)
            .await
            .map_err(|e| CompanyError::Source(format!("{:#}", e)))?;
        if matches.is_empty() {
            return Err(CompanyError::NotFound(query.to_string()));
        }
        for (i, m) in matches.iter().take(LOGGED_MATCHES).enumerate() {
            tracing::info!(rank = i + 1, id = %m.id, name = %m.name, "issuer match");
        }
        let issuer = matches[0].clone();

        let mut candidates = source
            .fetch(&issuer)
            .await
            .map_err(|e| CompanyError::Source(format!("{:#}", e)))?;
        if let Some(max) = self.settings.max_reports_per_company {
            candidates.truncate(max);
        }

        let crawler_errors: Vec<String> = candidates
            .iter()
            .filter(|c| !c.is_downloaded())
            .map(|c| c.label().to_string())
            .collect();

        let mut outcomes = Vec::new();
        for doc in candidates.iter().filter(|c| c.is_downloaded()) {
            outcomes.push(self.process_document(ticker, doc, index).await);
        }

        let report = CompanyReport {
            ticker: ticker.to_string(),
            issuer,
            candidates: candidates.len(),
            downloaded: outcomes.len(),
            crawler_errors,
            outcomes,
        };
        log_company_summary(&report);
        Ok(report)
    }

    pub async fn process_document(
        &self,
        ticker: &str,
        doc: &CandidateDocument,
        index: bool,
    ) -> DocumentOutcome {
        let Some(path) = doc.path.as_deref() else {
            tracing::error!(%ticker, file = %doc.label(), "downloaded entry without a local file");
            return DocumentOutcome::Failed(DocumentError::MissingFile(doc.label().to_string()));
        };

        let period = match normalize_period(&doc.period) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(%ticker, file = %doc.label(), error = %e, "skipping report");
                return DocumentOutcome::Failed(e.into());
            }
        };
        let year = period.year;
        let period_key = period.period_key();

        match self
            .archive
            .exists(ticker, year, &period_key, &blob::file_ext(path))
            .await
        {
            Ok(Some(address)) => {
                tracing::info!(%ticker, year, period = %period_key, %address, "report already in storage");
                return DocumentOutcome::Skipped(SkipReason::AlreadyPublished { address });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(%ticker, year, period = %period_key, error = %e, "storage probe failed");
                return DocumentOutcome::Failed(e.into());
            }
        }

        let address = match self.archive.publish(ticker, year, &period_key, path).await {
            Ok(address) => address,
            Err(e) => {
                tracing::error!(%ticker, year, period = %period_key, error = %e, "upload failed");
                return DocumentOutcome::Failed(e.into());
            }
        };

        let record = match self.catalog.create(ticker, year, &period_key, &address).await {
            Ok(CreateOutcome::Created(record)) => record,
            Ok(CreateOutcome::AlreadyExists) => {
                tracing::info!(%ticker, year, period = %period_key, "report already cataloged");
                return DocumentOutcome::Skipped(SkipReason::AlreadyCataloged);
            }
            Err(e) => {
                tracing::error!(%ticker, year, period = %period_key, error = %e, "catalog write failed");
                return DocumentOutcome::Failed(e.into());
            }
        };
        tracing::info!(%ticker, year, period = %period_key, report_id = record.id, "report cataloged");

        let index = match self.indexer.as_ref() {
            Some(indexer) if index => {
                let outcome = indexer.index_report(&record, path).await;
                if let IndexOutcome::Failed { report_id, ref error } = outcome {
                    tracing::error!(report_id, %error, "indexing failed, catalog record kept");
                }
                Some(outcome)
            }
            _ => None,
        };

        DocumentOutcome::Saved { record, index }
    }
}

fn log_company_summary(report: &CompanyReport) {
    tracing::info!(
        ticker = %report.ticker,
        issuer = %report.issuer.name,
        candidates = report.candidates,
        downloaded = report.downloaded,
        crawler_errors = report.crawler_errors.len(),
        saved = report.saved(),
        "company finished"
    );
    for name in &report.crawler_errors {
        tracing::warn!(ticker = %report.ticker, file = %name, "crawler failed to download");
    }
}
