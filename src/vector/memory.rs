//! In-process vector index for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::VectorIndex;
use crate::models::VectorPoint;

#[derive(Default)]
struct State {
    dims: Option<usize>,
    points: BTreeMap<u64, VectorPoint>,
}

/// A [`VectorIndex`] that keeps points in a map keyed by id.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    state: Mutex<State>,
    fail_deletes: bool,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// An index whose `delete_report` always fails.
    pub fn with_failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Self::default()
        }
    }

    pub fn dims(&self) -> Option<usize> {
        self.state.lock().ok()?.dims
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.points.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Points for one report, ordered by id.
    pub fn points_for(&self, report_id: i64) -> Vec<VectorPoint> {
        self.state
            .lock()
            .map(|s| {
                s.points
                    .values()
                    .filter(|p| p.payload.report_id == report_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn ensure_collection(&self, size: usize) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| anyhow!("index poisoned"))?;
        match state.dims {
            Some(existing) if existing != size => {
                bail!("collection has {} dims, requested {}", existing, size)
            }
            _ => state.dims = Some(size),
        }
        Ok(())
    }

    async fn delete_report(&self, report_id: i64) -> Result<()> {
        if self.fail_deletes {
            bail!("delete by filter unavailable");
        }
        let mut state = self.state.lock().map_err(|_| anyhow!("index poisoned"))?;
        state.points.retain(|_, p| p.payload.report_id != report_id);
        Ok(())
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| anyhow!("index poisoned"))?;
        let dims = state
            .dims
            .ok_or_else(|| anyhow!("collection does not exist"))?;
        if let Some(bad) = points.iter().find(|p| p.vector.len() != dims) {
            bail!(
                "point {} has {} dims, collection has {}",
                bad.id,
                bad.vector.len(),
                dims
            );
        }
        for point in points {
            state.points.insert(point.id, point.clone());
        }
        Ok(())
    }
}
