//! Core data models used throughout the report pipeline.
//!
//! These types represent the companies, candidate files, catalog rows, and
//! vector points that flow through acquisition and indexing.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A tracked company. Reference data supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    /// Exchange ticker, e.g. `"MOEX"`. Used as the catalog key.
    pub ticker: String,
    /// Legal registration number used to search the disclosure site.
    pub legal_id: String,
    #[serde(default)]
    pub name: String,
}

/// A hit returned by the disclosure source's company search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerMatch {
    pub id: String,
    pub name: String,
}

/// Download state reported by the crawler for a candidate file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Downloaded,
    Error,
}

/// A file discovered by the crawler, not yet verified as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDocument {
    /// Raw reporting-period text, e.g. `"2024, 6 месяцев"`.
    pub period: String,
    /// Local file; absent for entries the crawler failed to download.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub size: u64,
    pub status: DownloadStatus,
    #[serde(default)]
    pub name: Option<String>,
}

impl CandidateDocument {
    pub fn is_downloaded(&self) -> bool {
        self.status == DownloadStatus::Downloaded
    }

    /// Human-readable label for logs.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.period)
    }
}

/// Canonical reporting period: a year plus the number of months covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NormalizedPeriod {
    pub year: i32,
    pub months: u32,
}

impl NormalizedPeriod {
    /// The period string stored in the catalog and used in blob keys.
    pub fn period_key(&self) -> String {
        self.months.to_string()
    }
}

/// A row of the `reports` catalog table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogRecord {
    pub id: i64,
    pub ticker: String,
    pub year: i32,
    pub period: String,
    /// Durable address of the published artifact.
    pub address: String,
    pub created_at: i64,
}

/// Payload attached to every vector in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub report_id: i64,
    pub ticker: String,
    pub year: i32,
    pub period: String,
    pub chunk_index: usize,
    pub text: String,
}

/// One embedded chunk ready for upsert into the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A company-level failure recorded in a [`BatchResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    /// Company identifier (legal id or the query used).
    pub key: String,
    pub message: String,
}

/// Aggregated outcome of one pipeline invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Companies that completed without a company-level error.
    pub processed: usize,
    /// Catalog records created.
    pub saved: usize,
    pub errors: Vec<BatchError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_result_json_shape() {
        let result = BatchResult {
            processed: 2,
            saved: 3,
            errors: vec![BatchError {
                key: "7702077840".to_string(),
                message: "company not found: 7702077840".to_string(),
            }],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["processed"], 2);
        assert_eq!(json["saved"], 3);
        assert_eq!(json["errors"][0]["key"], "7702077840");
        assert!(json["errors"][0]["message"].is_string());
    }

    #[test]
    fn test_candidate_manifest_entry() {
        let doc: CandidateDocument = serde_json::from_str(
            r#"{"period": "2024, 6 месяцев", "path": "/tmp/a.zip", "status": "downloaded"}"#,
        )
        .unwrap();
        assert!(doc.is_downloaded());
        assert_eq!(doc.size, 0);
        assert_eq!(doc.label(), "2024, 6 месяцев");
        assert_eq!(doc.path.as_deref(), Some(std::path::Path::new("/tmp/a.zip")));
    }

    #[test]
    fn test_failed_manifest_entry_has_no_path() {
        let doc: CandidateDocument = serde_json::from_str(
            r#"{"name": "moex_2023.zip", "period": "2023", "status": "error", "url": "https://x"}"#,
        )
        .unwrap();
        assert!(!doc.is_downloaded());
        assert!(doc.path.is_none());
        assert_eq!(doc.label(), "moex_2023.zip");
    }

    #[test]
    fn test_only_terminal_statuses_accepted() {
        for (raw, status) in [
            ("downloaded", DownloadStatus::Downloaded),
            ("error", DownloadStatus::Error),
        ] {
            let parsed: DownloadStatus = serde_json::from_str(&format!("\"{}\"", raw)).unwrap();
            assert_eq!(parsed, status);
        }
        assert!(serde_json::from_str::<DownloadStatus>("\"downloading\"").is_err());
    }
}
