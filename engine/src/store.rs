//! Operation Store - durable queue of operation records.
//!
//! Every record lives under its own key (`op:<id>`) in the backing
//! [`KvStore`], serialized as JSON. Nothing is cached in memory: the backing
//! store is the only source of truth, so a crash between enqueue and the next
//! sync pass cannot lose an operation.

use crate::{
    error::Result, persistence::KvStore, Error, Operation, OperationId, OperationStatus,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const KEY_PREFIX: &str = "op:";

fn key_for(id: &str) -> String {
    format!("{KEY_PREFIX}{id}")
}

/// Counts of stored operations by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: usize,
    pub in_progress: usize,
    pub failed: usize,
    pub conflict: usize,
    /// Records whose stored form no longer decodes
    pub undecodable: usize,
}

impl QueueStats {
    /// Total number of records in the store.
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.failed + self.conflict + self.undecodable
    }
}

/// Result of reading every stored record.
struct Scan {
    operations: Vec<Operation>,
    undecodable: Vec<String>,
}

/// Keyed persistence of queued operations.
#[derive(Clone)]
pub struct OperationStore {
    kv: Arc<dyn KvStore>,
}

impl OperationStore {
    /// Create a store over the given persistence.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Persist a new operation. Fails if the id is already present.
    pub async fn enqueue(&self, operation: &Operation) -> Result<OperationId> {
        let key = key_for(&operation.id);
        if self.kv.get(&key).await?.is_some() {
            return Err(Error::DuplicateOperation(operation.id.clone()));
        }

        self.kv.set(&key, serde_json::to_string(operation)?).await?;
        Ok(operation.id.clone())
    }

    /// Load an operation by id.
    pub async fn get(&self, id: &str) -> Result<Option<Operation>> {
        match self.kv.get(&key_for(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn scan(&self) -> Result<Scan> {
        let entries = self.kv.scan_prefix(KEY_PREFIX).await?;
        let mut scan = Scan {
            operations: Vec::with_capacity(entries.len()),
            undecodable: Vec::new(),
        };

        for (key, raw) in entries {
            match serde_json::from_str::<Operation>(&raw) {
                Ok(op) => scan.operations.push(op),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping undecodable operation record");
                    scan.undecodable.push(key);
                }
            }
        }

        Ok(scan)
    }

    /// All operations that are not completed.
    ///
    /// A record that fails to decode is skipped rather than blocking the
    /// rest of the queue; [`OperationStore::undecodable`] lists those.
    pub async fn list_pending(&self) -> Result<Vec<Operation>> {
        Ok(self
            .scan()
            .await?
            .operations
            .into_iter()
            .filter(|op| op.status != OperationStatus::Completed)
            .collect())
    }

    /// Keys of stored records that no longer decode as operations.
    pub async fn undecodable(&self) -> Result<Vec<String>> {
        Ok(self.scan().await?.undecodable)
    }

    /// Highest enqueue sequence among stored records, if any.
    pub async fn max_sequence(&self) -> Result<Option<u64>> {
        Ok(self.scan().await?.operations.iter().map(|op| op.sequence).max())
    }

    /// Delete records left `COMPLETED` by a pass that stopped before
    /// removing them. Returns how many were deleted.
    pub async fn purge_completed(&self) -> Result<usize> {
        let mut purged = 0;
        for op in self.scan().await?.operations {
            if op.status == OperationStatus::Completed {
                self.remove(&op.id).await?;
                purged += 1;
            }
        }

        if purged > 0 {
            tracing::info!(purged, "Removed leftover completed operations");
        }
        Ok(purged)
    }

    /// All operations with the given status.
    pub async fn list_by_status(&self, status: OperationStatus) -> Result<Vec<Operation>> {
        Ok(self
            .list_pending()
            .await?
            .into_iter()
            .filter(|op| op.status == status)
            .collect())
    }

    /// Overwrite the stored record with `operation`.
    pub async fn save(&self, operation: &Operation) -> Result<()> {
        self.kv
            .set(&key_for(&operation.id), serde_json::to_string(operation)?)
            .await
    }

    /// Delete an operation. Removing a missing id is not an error.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.kv.delete(&key_for(id)).await
    }

    /// Count stored operations by status.
    pub async fn stats(&self) -> Result<QueueStats> {
        let scan = self.scan().await?;
        let mut stats = QueueStats {
            undecodable: scan.undecodable.len(),
            ..QueueStats::default()
        };
        for op in scan.operations {
            match op.status {
                OperationStatus::Pending => stats.pending += 1,
                OperationStatus::InProgress => stats.in_progress += 1,
                OperationStatus::Failed => stats.failed += 1,
                OperationStatus::Conflict => stats.conflict += 1,
                OperationStatus::Completed => {}
            }
        }
        Ok(stats)
    }
}

impl std::fmt::Debug for OperationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationStore").finish_non_exhaustive()
    }
}
