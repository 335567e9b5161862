//! Conflict Registry - operations waiting on an explicit resolution.
//!
//! An operation in `CONFLICT` is parked: sync passes never select it and it
//! never transitions on its own. [`ConflictRegistry::resolve`] is the only way
//! out.

use crate::{
    error::Result, Clock, Error, Operation, OperationExecutor, OperationStatus, OperationStore,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// How to settle a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Retry with the original local payload (local write wins).
    UseLocal,
    /// Drop the local mutation and cache the server version (remote wins).
    UseServer,
    /// Retry with a caller-supplied merged payload.
    Merge,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::UseLocal => "use_local",
            Resolution::UseServer => "use_server",
            Resolution::Merge => "merge",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "use_local" => Ok(Resolution::UseLocal),
            "use_server" => Ok(Resolution::UseServer),
            "merge" => Ok(Resolution::Merge),
            other => Err(Error::UnknownResolution(other.to_string())),
        }
    }
}

/// Holds conflicted operations and applies resolutions to them.
#[derive(Clone)]
pub struct ConflictRegistry {
    store: OperationStore,
    executor: OperationExecutor,
    clock: Arc<dyn Clock>,
}

impl ConflictRegistry {
    pub fn new(store: OperationStore, executor: OperationExecutor, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            executor,
            clock,
        }
    }

    /// All operations currently in conflict, oldest first.
    pub async fn list(&self) -> Result<Vec<Operation>> {
        let mut conflicts = self.store.list_by_status(OperationStatus::Conflict).await?;
        conflicts.sort_by(|a, b| {
            a.enqueued_at
                .cmp(&b.enqueued_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(conflicts)
    }

    /// Settle the conflict on `operation_id`.
    ///
    /// Validation happens before any write: an unknown id, an operation that
    /// is not in conflict, or a merge without a payload leave the store as is.
    pub async fn resolve(
        &self,
        operation_id: &str,
        resolution: Resolution,
        merged_payload: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut operation = self
            .store
            .get(operation_id)
            .await?
            .ok_or_else(|| Error::OperationNotFound(operation_id.to_string()))?;

        if operation.status != OperationStatus::Conflict {
            return Err(Error::NotInConflict(operation_id.to_string()));
        }

        match resolution {
            Resolution::UseLocal => {
                operation.restart(self.clock.now());
                self.store.save(&operation).await?;
            }
            Resolution::UseServer => {
                let server_payload = operation
                    .conflict_data
                    .as_ref()
                    .map(|conflict| conflict.server_payload.clone());

                self.store.remove(&operation.id).await?;

                if let Some(server_payload) = server_payload {
                    self.executor
                        .write_server_version(&operation, &server_payload)
                        .await;
                }
            }
            Resolution::Merge => {
                let merged =
                    merged_payload.ok_or_else(|| Error::MissingMergePayload(operation.id.clone()))?;
                operation.payload = merged;
                operation.restart(self.clock.now());
                self.store.save(&operation).await?;
            }
        }

        tracing::info!(op_id = %operation_id, resolution = %resolution, "Conflict resolved");
        Ok(())
    }

    /// Like [`ConflictRegistry::resolve`], taking the resolution by name.
    pub async fn resolve_named(
        &self,
        operation_id: &str,
        resolution: &str,
        merged_payload: Option<serde_json::Value>,
    ) -> Result<()> {
        let resolution = resolution.parse()?;
        self.resolve(operation_id, resolution, merged_payload).await
    }
}

impl fmt::Debug for ConflictRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictRegistry").finish_non_exhaustive()
    }
}
