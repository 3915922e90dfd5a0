//! Artifact deduplication and publishing.
//!
//! Every report lands in blob storage under a deterministic key:
//!
//! ```text
//! reports/{norm(ticker)}/{year}/{norm(period)}/report{ext}
//! ```
//!
//! so probing for an existing artifact is a single `HEAD`. [`ReportArchive`]
//! wraps a [`BlobStore`] backend with the key scheme and maps backend
//! failures into [`PublishError`].
//!
//! Backends:
//! - [`S3BlobStore`]: S3-compatible REST API with SigV4 signing
//! - [`InMemoryBlobStore`]: process-local map for tests and dry runs

pub mod memory;
pub mod s3;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::PublishError;

pub use memory::InMemoryBlobStore;
pub use s3::S3BlobStore;

/// A key/value object store addressed by string keys.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Whether an object exists under `key`.
    async fn head(&self, key: &str) -> Result<bool>;

    /// Store `bytes` under `key`, overwriting any previous object, and
    /// return its durable address.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String>;

    /// The durable address an object under `key` has (or would have).
    fn address(&self, key: &str) -> String;
}

/// Lowercase `value` and collapse every run of non-alphanumeric characters
/// into a single hyphen, trimming hyphens at both ends.
pub fn norm(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_hyphen = false;
    for c in value.chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.extend(c.to_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    out
}

/// Blob key for one report artifact. `ext` includes the leading dot.
pub fn report_key(ticker: &str, year: i32, period: &str, ext: &str) -> String {
    format!(
        "reports/{}/{}/{}/report{}",
        norm(ticker),
        year,
        norm(period),
        ext
    )
}

/// File extension of `path` including the dot, or empty.
pub fn file_ext(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

/// Report-shaped view over a [`BlobStore`].
#[derive(Clone)]
pub struct ReportArchive {
    store: Arc<dyn BlobStore>,
}

impl ReportArchive {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Return the address of an already published artifact, if any.
    pub async fn exists(
        &self,
        ticker: &str,
        year: i32,
        period: &str,
        ext: &str,
    ) -> Result<Option<String>, PublishError> {
        let key = report_key(ticker, year, period, ext);
        let found = self.store.head(&key).await.map_err(|e| PublishError::Probe {
            key: key.clone(),
            message: format!("{:#}", e),
        })?;
        Ok(found.then(|| self.store.address(&key)))
    }

    /// Upload the local file at `path` and return its durable address.
    ///
    /// Re-publishing the same `(ticker, year, period)` overwrites the object
    /// under the same key.
    pub async fn publish(
        &self,
        ticker: &str,
        year: i32,
        period: &str,
        path: &Path,
    ) -> Result<String, PublishError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| PublishError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let key = report_key(ticker, year, period, &file_ext(path));
        let size = bytes.len();
        let address = self
            .store
            .put(&key, bytes)
            .await
            .map_err(|e| PublishError::Upload {
                key: key.clone(),
                message: format!("{:#}", e),
            })?;
        tracing::info!(%ticker, year, %period, %key, size, "published report");
        Ok(address)
    }
}
