//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/reports.sqlite"
//!
//! [storage]
//! bucket = "disclosure-reports"
//!
//! [embedding]
//! provider = "gemini"
//! model = "gemini-embedding-001"
//! dims = 3072
//!
//! [[companies]]
//! legal_id = "7702077840"
//! ticker = "MOEX"
//! name = "Московская Биржа"
//! ```
//!
//! Every section except `[db]` is optional. Secrets never live in the file:
//! storage credentials come from `AWS_*`, provider keys from
//! `OPENAI_API_KEY` / `GEMINI_API_KEY`, and `ADMIN_API_KEY` overrides
//! `server.admin_api_key`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::Company;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub companies: Vec<Company>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `"s3"` or `"memory"`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_storage_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            endpoint_url: default_endpoint_url(),
            bucket: String::new(),
            region: default_region(),
            timeout_secs: default_storage_timeout_secs(),
        }
    }
}

fn default_storage_backend() -> String {
    "s3".to_string()
}
fn default_endpoint_url() -> String {
    "https://storage.yandexcloud.net".to_string()
}
fn default_region() -> String {
    "ru-central1".to_string()
}
fn default_storage_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Total attempts per batch, including the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_inter_batch_delay_ms() -> u64 {
    500
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// `"qdrant"` or `"memory"`.
    #[serde(default = "default_vector_backend")]
    pub backend: String,
    #[serde(default = "default_vector_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            url: default_vector_url(),
            collection: default_collection(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_vector_backend() -> String {
    "qdrant".to_string()
}
fn default_vector_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "reports_embeddings".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Reports with less extracted text than this are treated as unreadable.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_text_chars: default_min_text_chars(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_min_text_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CrawlerConfig {
    /// JSON download manifest written by the crawler.
    #[serde(default)]
    pub manifest: Option<PathBuf>,
    #[serde(default)]
    pub delay_between_companies_ms: u64,
    #[serde(default)]
    pub max_reports_per_company: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub admin_api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            admin_api_key: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Read, parse, apply environment overrides and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;

    if let Ok(key) = std::env::var("ADMIN_API_KEY") {
        if !key.is_empty() {
            config.server.admin_api_key = Some(key);
        }
    }

    Ok(config)
}

/// Parse and validate TOML config text. No environment lookups.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }

    // Validate embedding
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.max_retries < 1 {
        anyhow::bail!("embedding.max_retries must be >= 1");
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "gemini" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or gemini.",
            other
        ),
    }

    match config.storage.backend.as_str() {
        "s3" | "memory" => {}
        other => anyhow::bail!("Unknown storage backend: '{}'. Must be s3 or memory.", other),
    }
    if config.storage.backend == "s3" && config.storage.bucket.trim().is_empty() {
        anyhow::bail!("storage.bucket must be set for the s3 backend");
    }

    match config.vector.backend.as_str() {
        "qdrant" | "memory" => {}
        other => anyhow::bail!(
            "Unknown vector backend: '{}'. Must be qdrant or memory.",
            other
        ),
    }

    // Validate companies
    let mut seen = std::collections::HashSet::new();
    for company in &config.companies {
        if company.ticker.trim().is_empty() || company.legal_id.trim().is_empty() {
            anyhow::bail!("every [[companies]] entry needs a ticker and a legal_id");
        }
        if !seen.insert(company.legal_id.as_str()) {
            anyhow::bail!("duplicate company legal_id: {}", company.legal_id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "/tmp/reports.sqlite"

[storage]
backend = "memory"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.chunking.min_text_chars, 100);
        assert_eq!(config.embedding.batch_size, 100);
        assert_eq!(config.embedding.max_retries, 3);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.vector.collection, "reports_embeddings");
        assert_eq!(config.storage.endpoint_url, "https://storage.yandexcloud.net");
        assert_eq!(config.storage.region, "ru-central1");
        assert!(config.companies.is_empty());
    }

    #[test]
    fn test_companies_parse() {
        let text = format!(
            "{}\n[[companies]]\nlegal_id = \"7702077840\"\nticker = \"MOEX\"\nname = \"Московская Биржа\"\n",
            MINIMAL
        );
        let config = parse_config(&text).unwrap();
        assert_eq!(config.companies.len(), 1);
        assert_eq!(config.companies[0].ticker, "MOEX");
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            "[chunking]\nchunk_size = 0\n",
            "[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
            "[embedding]\nbatch_size = 0\n",
            "[embedding]\nmax_retries = 0\n",
            "[embedding]\nprovider = \"gemini\"\nmodel = \"m\"\n",
            "[embedding]\nprovider = \"openai\"\ndims = 8\n",
            "[embedding]\nprovider = \"cohere\"\n",
            "[vector]\nbackend = \"pinecone\"\n",
            "[[companies]]\nlegal_id = \"1\"\nticker = \"A\"\n[[companies]]\nlegal_id = \"1\"\nticker = \"B\"\n",
        ];
        for extra in cases {
            let text = format!("{}{}", MINIMAL, extra);
            assert!(parse_config(&text).is_err(), "accepted: {}", extra);
        }
    }

    #[test]
    fn test_s3_backend_requires_bucket() {
        let text = "[db]\npath = \"/tmp/r.sqlite\"\n";
        assert!(parse_config(text).is_err());
        let text = "[db]\npath = \"/tmp/r.sqlite\"\n[storage]\nbucket = \"b\"\n";
        assert!(parse_config(text).is_ok());
    }
}
