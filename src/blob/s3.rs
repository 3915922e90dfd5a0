//! S3-compatible blob store.
//!
//! Talks to the S3 REST API directly with
//! [AWS Signature Version 4](https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-auth-using-authorization-header.html)
//! request signing (`hmac` + `sha2`). Requests use path-style URLs
//! (`{endpoint}/{bucket}/{key}`), which every S3-compatible service accepts,
//! including Yandex Object Storage, MinIO and LocalStack.
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! endpoint_url = "https://storage.yandexcloud.net"
//! bucket = "disclosure-reports"
//! region = "ru-central1"
//! timeout_secs = 60
//! ```
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::BlobStore;
use crate::config::StorageConfig;

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

pub struct S3BlobStore {
    client: reqwest::Client,
    creds: AwsCredentials,
    /// Endpoint without trailing slash, scheme included.
    endpoint: String,
    host: String,
    bucket: String,
    region: String,
}

impl S3BlobStore {
    /// Build a store from config, reading credentials from the environment.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::new(config, AwsCredentials::from_env()?)
    }

    pub fn new(config: &StorageConfig, creds: AwsCredentials) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            bail!("storage.bucket must be set");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build S3 HTTP client")?;
        let endpoint = config.endpoint_url.trim_end_matches('/').to_string();
        Ok(Self {
            client,
            creds,
            host: endpoint_host(&endpoint),
            endpoint,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
        })
    }

    fn canonical_uri(&self, key: &str) -> String {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        format!("/{}/{}", uri_encode(&self.bucket), encoded_key)
    }

    /// Build a signed request for `method` on `key` with the given payload hash.
    fn signed_request(
        &self,
        method: reqwest::Method,
        key: &str,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> reqwest::RequestBuilder {
        let canonical_uri = self.canonical_uri(key);
        let url = format!("{}{}", self.endpoint, canonical_uri);
        let auth = sign_request(
            &self.creds,
            &self.region,
            &self.host,
            method.as_str(),
            &canonical_uri,
            payload_hash,
            now,
        );

        let mut req = self
            .client
            .request(method, &url)
            .header("Authorization", &auth.authorization)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", &auth.amz_date);
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        req
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn head(&self, key: &str) -> Result<bool> {
        let payload_hash = hex_sha256(b"");
        let resp = self
            .signed_request(reqwest::Method::HEAD, key, &payload_hash, Utc::now())
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to probe s3://{}/{}: {}", self.bucket, key, e))?;

        match resp.status() {
            s if s.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            s => bail!("S3 HeadObject failed (HTTP {}) for key '{}'", s, key),
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        let payload_hash = hex_sha256(&bytes);
        let resp = self
            .signed_request(reqwest::Method::PUT, key, &payload_hash, Utc::now())
            .header("Content-Type", detect_content_type(key))
            .body(bytes)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to put s3://{}/{}: {}", self.bucket, key, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {}) for key '{}': {}",
                status,
                key,
                body.chars().take(500).collect::<String>()
            );
        }

        Ok(self.address(key))
    }

    fn address(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

// ============ AWS SigV4 Helpers ============

struct SignedAuth {
    authorization: String,
    amz_date: String,
}

/// Sign a request without a query string. Signed headers are `host`,
/// `x-amz-content-sha256`, `x-amz-date` and, with temporary credentials,
/// `x-amz-security-token`.
fn sign_request(
    creds: &AwsCredentials,
    region: &str,
    host: &str,
    method: &str,
    canonical_uri: &str,
    payload_hash: &str,
    now: DateTime<Utc>,
) -> SignedAuth {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        method, canonical_uri, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3");
    let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

    SignedAuth {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        ),
        amz_date,
    }
}

/// Host component of an endpoint URL, as sent in the `Host` header.
///
/// A port equal to the scheme's default is dropped because HTTP clients
/// omit it from the header that gets signed.
fn endpoint_host(endpoint: &str) -> String {
    let (rest, default_port) = if let Some(rest) = endpoint.strip_prefix("https://") {
        (rest, ":443")
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        (rest, ":80")
    } else {
        (endpoint, "")
    };
    let host = rest.split('/').next().unwrap_or_default();
    match host.strip_suffix(default_port) {
        Some(bare) if !default_port.is_empty() => bare.to_string(),
        _ => host.to_string(),
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a path segment per RFC 3986, leaving `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

fn detect_content_type(key: &str) -> &'static str {
    match key.rsplit('.').next() {
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn creds() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: None,
        }
    }

    fn store() -> S3BlobStore {
        let config = StorageConfig {
            endpoint_url: "https://storage.yandexcloud.net/".to_string(),
            bucket: "disclosure-reports".to_string(),
            region: "ru-central1".to_string(),
            timeout_secs: 5,
            ..StorageConfig::default()
        };
        S3BlobStore::new(&config, creds()).unwrap()
    }

    #[test]
    fn test_signing_key_known_vector() {
        // From the AWS SigV4 documentation.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("report.zip"), "report.zip");
        assert_eq!(uri_encode("a b+c"), "a%20b%2Bc");
        assert_eq!(uri_encode("сбер"), "%D1%81%D0%B1%D0%B5%D1%80");
    }

    #[test]
    fn test_path_style_addressing() {
        let s = store();
        assert_eq!(s.host, "storage.yandexcloud.net");
        assert_eq!(
            s.address("reports/moex/2024/6/report.zip"),
            "https://storage.yandexcloud.net/disclosure-reports/reports/moex/2024/6/report.zip"
        );
        assert_eq!(
            s.canonical_uri("reports/moex/2024/6/report.zip"),
            "/disclosure-reports/reports/moex/2024/6/report.zip"
        );
    }

    #[test]
    fn test_signature_is_deterministic_and_scoped() {
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        let a = sign_request(
            &creds(),
            "ru-central1",
            "storage.yandexcloud.net",
            "PUT",
            "/b/k",
            &hex_sha256(b"data"),
            now,
        );
        let b = sign_request(
            &creds(),
            "ru-central1",
            "storage.yandexcloud.net",
            "PUT",
            "/b/k",
            &hex_sha256(b"data"),
            now,
        );
        assert_eq!(a.authorization, b.authorization);
        assert_eq!(a.amz_date, "20240701T120000Z");
        assert!(a
            .authorization
            .contains("Credential=AKIDEXAMPLE/20240701/ru-central1/s3/aws4_request"));
        assert!(a
            .authorization
            .contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));

        let other = sign_request(
            &creds(),
            "ru-central1",
            "storage.yandexcloud.net",
            "HEAD",
            "/b/k",
            &hex_sha256(b""),
            now,
        );
        assert_ne!(a.authorization, other.authorization);
    }

    #[test]
    fn test_host_header_drops_default_ports() {
        assert_eq!(endpoint_host("https://storage.yandexcloud.net:443"), "storage.yandexcloud.net");
        assert_eq!(endpoint_host("http://minio.local:80/"), "minio.local");
        assert_eq!(endpoint_host("http://localhost:9000"), "localhost:9000");
        assert_eq!(endpoint_host("https://minio.local:8443/base"), "minio.local:8443");
        assert_eq!(endpoint_host("http://minio.local:443"), "minio.local:443");
        assert_eq!(endpoint_host("storage.example.com:80"), "storage.example.com:80");
    }

    #[test]
    fn test_missing_bucket_rejected() {
        let config = StorageConfig {
            bucket: " ".to_string(),
            ..StorageConfig::default()
        };
        assert!(S3BlobStore::new(&config, creds()).is_err());
    }
}
