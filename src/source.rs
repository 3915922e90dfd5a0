//! Disclosure-site crawler capability.
//!
//! The pipeline only needs two things from a crawler: find an issuer by
//! legal id or name, and hand back the report files it downloaded for that
//! issuer. [`DisclosureSource`] captures exactly that, so the pipeline runs
//! the same against a live browser session or against [`ManifestSource`],
//! which replays the JSON download manifest a crawler run leaves behind.
//!
//! # Manifest format
//!
//! ```json
//! {
//!   "issuers": [
//!     {
//!       "id": "1234",
//!       "name": "ПАО Московская Биржа",
//!       "legal_id": "7702077840",
//!       "reports": [
//!         { "period": "2024, 6 месяцев", "path": "downloads/moex_6m.zip",
//!           "size": 52311, "status": "downloaded" },
//!         { "name": "moex_2019.zip", "period": "2019", "status": "error" }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Relative report paths resolve against the manifest's directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::CrawlerConfig;
use crate::models::{CandidateDocument, IssuerMatch};

/// A session with the disclosure site.
#[async_trait]
pub trait DisclosureSource: Send {
    /// Search issuers by legal id or free text, best match first.
    async fn search(&mut self, query: &str) -> Result<Vec<IssuerMatch>>;

    /// Download (or list already downloaded) report files for an issuer.
    async fn fetch(&mut self, issuer: &IssuerMatch) -> Result<Vec<CandidateDocument>>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestIssuer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub legal_id: Option<String>,
    #[serde(default)]
    pub reports: Vec<CandidateDocument>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    issuers: Vec<ManifestIssuer>,
}

/// [`DisclosureSource`] over a fixed list of issuers and their files.
#[derive(Debug, Clone, Default)]
pub struct ManifestSource {
    issuers: Vec<ManifestIssuer>,
}

impl ManifestSource {
    pub fn from_entries(issuers: Vec<ManifestIssuer>) -> Self {
        Self { issuers }
    }

    /// Load a crawler manifest from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        let manifest: Manifest = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;

        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let issuers = manifest
            .issuers
            .into_iter()
            .map(|mut issuer| {
                for report in &mut issuer.reports {
                    if let Some(p) = report.path.take() {
                        report.path = Some(resolve(&base, p));
                    }
                }
                issuer
            })
            .collect();
        Ok(Self { issuers })
    }

    fn matches(issuer: &ManifestIssuer, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return false;
        }
        issuer.legal_id.as_deref() == Some(query)
            || issuer.id == query
            || issuer.name.to_lowercase().contains(&query.to_lowercase())
    }
}

/// Open a fresh crawler session for one pipeline invocation.
pub fn open_source(config: &CrawlerConfig) -> Result<Box<dyn DisclosureSource>> {
    let manifest = config
        .manifest
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("crawler.manifest is not configured"))?;
    Ok(Box::new(ManifestSource::load(manifest)?))
}

fn resolve(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[async_trait]
impl DisclosureSource for ManifestSource {
    async fn search(&mut self, query: &str) -> Result<Vec<IssuerMatch>> {
        Ok(self
            .issuers
            .iter()
            .filter(|issuer| Self::matches(issuer, query))
            .map(|issuer| IssuerMatch {
                id: issuer.id.clone(),
                name: issuer.name.clone(),
            })
            .collect())
    }

    async fn fetch(&mut self, issuer: &IssuerMatch) -> Result<Vec<CandidateDocument>> {
        Ok(self
            .issuers
            .iter()
            .find(|i| i.id == issuer.id)
            .map(|i| i.reports.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
      "issuers": [
        {
          "id": "1234",
          "name": "ПАО Московская Биржа",
          "legal_id": "7702077840",
          "reports": [
            { "period": "2024, 6 месяцев", "path": "downloads/moex_6m.zip", "status": "downloaded" },
            { "period": "2023", "path": "/abs/moex_2023.zip", "status": "downloaded" },
            { "name": "moex_2019.zip", "period": "2019", "status": "error" }
          ]
        },
        { "id": "99", "name": "Московская Биржа (архив)", "reports": [] }
      ]
    }"#;

    fn load() -> (tempfile::TempDir, ManifestSource) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, MANIFEST).unwrap();
        let source = ManifestSource::load(&path).unwrap();
        (dir, source)
    }

    #[tokio::test]
    async fn test_search_by_legal_id_and_name() {
        let (_dir, mut source) = load();
        let by_id = source.search("7702077840").await.unwrap();
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].id, "1234");

        let by_name = source.search("московская биржа").await.unwrap();
        assert_eq!(by_name.len(), 2);
        assert_eq!(by_name[0].id, "1234");

        assert!(source.search("0000000000").await.unwrap().is_empty());
        assert!(source.search("  ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_resolves_relative_paths() {
        let (dir, mut source) = load();
        let issuer = source.search("7702077840").await.unwrap().remove(0);
        let reports = source.fetch(&issuer).await.unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(
            reports[0].path.as_deref(),
            Some(dir.path().join("downloads/moex_6m.zip").as_path())
        );
        assert_eq!(reports[1].path.as_deref(), Some(Path::new("/abs/moex_2023.zip")));
        assert!(reports[2].path.is_none());
    }

    #[test]
    fn test_bad_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(ManifestSource::load(&path).is_err());
        assert!(ManifestSource::load(&dir.path().join("missing.json")).is_err());
    }
}
