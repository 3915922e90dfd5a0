//! Vector index abstraction.
//!
//! The indexer only needs three operations from the index: make sure the
//! collection exists with the right dimensionality, drop every point that
//! belongs to a report, and upsert a report's points. Point ids are derived
//! from the catalog id so a re-index overwrites in place:
//!
//! ```text
//! id = report_id × 100000 + chunk_index
//! ```

pub mod memory;
pub mod qdrant;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::VectorConfig;
use crate::models::VectorPoint;

pub use memory::InMemoryVectorIndex;
pub use qdrant::QdrantIndex;

/// Chunks per report that fit in the point-id scheme.
pub const MAX_CHUNKS_PER_REPORT: usize = 100_000;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection for vectors of `size` dimensions if missing.
    async fn ensure_collection(&self, size: usize) -> Result<()>;

    /// Remove all points whose payload `report_id` equals `report_id`.
    async fn delete_report(&self, report_id: i64) -> Result<()>;

    /// Insert or replace points by id.
    async fn upsert(&self, points: &[VectorPoint]) -> Result<()>;
}

/// Point id for chunk `chunk_index` of report `report_id`, or `None` when
/// the id would collide with another report's range.
pub fn point_id(report_id: i64, chunk_index: usize) -> Option<u64> {
    if report_id < 0 || chunk_index >= MAX_CHUNKS_PER_REPORT {
        return None;
    }
    (report_id as u64)
        .checked_mul(MAX_CHUNKS_PER_REPORT as u64)?
        .checked_add(chunk_index as u64)
}

/// Build the configured vector index backend.
pub fn create_index(config: &VectorConfig) -> Result<Arc<dyn VectorIndex>> {
    match config.backend.as_str() {
        "qdrant" => Ok(Arc::new(QdrantIndex::from_config(config)?)),
        "memory" => Ok(Arc::new(InMemoryVectorIndex::new())),
        other => bail!("Unknown vector backend: {}", other),
    }
}
