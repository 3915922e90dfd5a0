//! Typed failures for each pipeline stage.
//!
//! Component boundaries return these `thiserror` enums so the orchestrator
//! can tell a skipped document from a failed one without string matching.
//! Backend traits ([`BlobStore`](crate::blob::BlobStore),
//! [`VectorIndex`](crate::vector::VectorIndex), ...) return `anyhow::Result`
//! and are wrapped into the variants below at the component edge.

use std::path::PathBuf;

use thiserror::Error;

use crate::extract::ExtractError;

/// A reporting-period string that could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse reporting period '{input}': {reason}")]
pub struct PeriodParseError {
    /// The raw period text, exactly as the crawler produced it.
    pub input: String,
    pub reason: String,
}

impl PeriodParseError {
    pub(crate) fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("cannot read report file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("blob probe failed for '{key}': {message}")]
    Probe { key: String, message: String },

    #[error("blob upload failed for '{key}': {message}")]
    Upload { key: String, message: String },
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("catalog record rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("text extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    #[error("extracted text is too short or unreadable ({0} chars)")]
    TextTooShort(usize),

    #[error("no chunks produced from {0} chars of text")]
    NoChunks(usize),

    #[error("{0} chunks exceed the per-report vector id range")]
    TooManyChunks(usize),

    #[error("embedding batch {batch} failed after {attempts} attempts: {message}")]
    Embedding {
        batch: usize,
        attempts: u32,
        message: String,
    },

    #[error("embedding count mismatch: {chunks} chunks but {embeddings} embeddings")]
    EmbeddingCountMismatch { chunks: usize, embeddings: usize },

    #[error("vector index error: {0}")]
    VectorIndex(String),
}

#[derive(Debug, Error)]
pub enum CompanyError {
    #[error("company not found: {0}")]
    NotFound(String),

    #[error("disclosure source failed: {0}")]
    Source(String),
}
