//! Qdrant vector index over its REST API.
//!
//! ```toml
//! [vector]
//! url = "http://localhost:6333"
//! collection = "reports_embeddings"
//! ```
//!
//! An API key, when the server requires one, is read from `QDRANT_API_KEY`.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::VectorIndex;
use crate::config::VectorConfig;
use crate::models::VectorPoint;

/// Points sent per upsert request.
const UPSERT_BATCH: usize = 256;

pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

impl QdrantIndex {
    pub fn from_config(config: &VectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build Qdrant HTTP client")?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: std::env::var("QDRANT_API_KEY").ok().filter(|k| !k.is_empty()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, path)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match self.api_key {
            Some(ref key) => req.header("api-key", key),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> Result<()> {
        let resp = req
            .send()
            .await
            .with_context(|| format!("Qdrant {} request failed", what))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "Qdrant {} failed (HTTP {}): {}",
                what,
                status,
                body.chars().take(500).collect::<String>()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self, size: usize) -> Result<()> {
        let resp = self
            .request(reqwest::Method::GET, self.url(""))
            .send()
            .await
            .context("Qdrant collection lookup failed")?;
        if resp.status().is_success() {
            tracing::debug!(collection = %self.collection, "collection exists");
            return Ok(());
        }
        if resp.status() != reqwest::StatusCode::NOT_FOUND {
            bail!("Qdrant collection lookup failed (HTTP {})", resp.status());
        }

        self.send(
            self.request(reqwest::Method::PUT, self.url(""))
                .json(&create_collection_body(size)),
            "create collection",
        )
        .await?;
        self.send(
            self.request(reqwest::Method::PUT, self.url("/index?wait=true"))
                .json(&serde_json::json!({
                    "field_name": "report_id",
                    "field_schema": "integer",
                })),
            "create payload index",
        )
        .await?;
        tracing::info!(collection = %self.collection, size, "created vector collection");
        Ok(())
    }

    async fn delete_report(&self, report_id: i64) -> Result<()> {
        self.send(
            self.request(reqwest::Method::POST, self.url("/points/delete?wait=true"))
                .json(&delete_filter_body(report_id)),
            "delete points",
        )
        .await
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        for batch in points.chunks(UPSERT_BATCH) {
            self.send(
                self.request(reqwest::Method::PUT, self.url("/points?wait=true"))
                    .json(&upsert_body(batch)),
                "upsert points",
            )
            .await?;
        }
        Ok(())
    }
}

fn create_collection_body(size: usize) -> serde_json::Value {
    serde_json::json!({
        "vectors": { "size": size, "distance": "Cosine" }
    })
}

fn delete_filter_body(report_id: i64) -> serde_json::Value {
    serde_json::json!({
        "filter": {
            "must": [ { "key": "report_id", "match": { "value": report_id } } ]
        }
    })
}

fn upsert_body(points: &[VectorPoint]) -> serde_json::Value {
    let points: Vec<serde_json::Value> = points
        .iter()
        .map(|p| {
            serde_json::json!({
                "id": p.id,
                "vector": p.vector,
                "payload": p.payload,
            })
        })
        .collect();
    serde_json::json!({ "points": points })
}
