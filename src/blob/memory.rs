//! In-process blob store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::BlobStore;

/// A [`BlobStore`] backed by a map. Addresses are `{base}/{key}`.
pub struct InMemoryBlobStore {
    base: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    /// Seed an object directly, as if published by an earlier run.
    pub fn insert(&self, key: &str, bytes: Vec<u8>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(key.to_string(), bytes);
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().ok()?.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn head(&self, key: &str) -> Result<bool> {
        let objects = self.objects.lock().map_err(|_| anyhow!("blob map poisoned"))?;
        Ok(objects.contains_key(key))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        let mut objects = self.objects.lock().map_err(|_| anyhow!("blob map poisoned"))?;
        objects.insert(key.to_string(), bytes);
        Ok(self.address(key))
    }

    fn address(&self, key: &str) -> String {
        format!("{}/{}", self.base, key)
    }
}
