//! Sync Orchestrator - the control loop that drains the queue.
//!
//! # Algorithm
//!
//! 1. Refuse to start if a pass is already running or the device is offline
//! 2. Load every stored operation; reset records left `IN_PROGRESS` by an
//!    interrupted process back to `PENDING`
//! 3. Keep the `PENDING` ones whose `next_retry_at` has passed
//! 4. Sort by (priority desc, enqueued_at asc)
//! 5. Execute one at a time, persisting each transition, and publish progress
//!
//! Operations enqueued while a pass runs wait for the next pass. Conflicted
//! and terminally failed operations are never selected.

use crate::connectivity::Connectivity;
use crate::operation::pass_order;
use crate::progress::{ProgressBus, SyncEvent};
use crate::{
    error::Result, Clock, ExecutionOutcome, Operation, OperationExecutor, OperationStatus,
    OperationStore, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Why a pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another pass holds the single-flight flag
    AlreadyRunning,
    /// Connectivity is down
    Offline,
}

/// Result of [`SyncOrchestrator::run_pass`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    /// The pass ran to completion
    pub success: bool,
    /// Operations completed and removed
    pub synced: usize,
    /// Operations that failed this attempt (retrying or terminal)
    pub failed: usize,
    /// Operations moved to conflict
    pub conflicts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    /// Structural error that aborted the pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncOutcome {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// Clears the single-flight flag however the pass exits.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Select and order the operations a pass at `now` will process.
pub fn plan_pass(operations: Vec<Operation>, now: Timestamp) -> Vec<Operation> {
    let mut batch: Vec<_> = operations
        .into_iter()
        .filter(|op| op.is_eligible(now))
        .collect();
    batch.sort_by(pass_order);
    batch
}

/// Runs sync passes, at most one at a time.
pub struct SyncOrchestrator {
    store: OperationStore,
    executor: OperationExecutor,
    bus: ProgressBus,
    connectivity: Arc<dyn Connectivity>,
    clock: Arc<dyn Clock>,
    in_progress: AtomicBool,
}

impl SyncOrchestrator {
    pub fn new(
        store: OperationStore,
        executor: OperationExecutor,
        bus: ProgressBus,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            executor,
            bus,
            connectivity,
            clock,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Whether a pass is currently running.
    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Run one sync pass.
    ///
    /// A pass that cannot start returns a skipped outcome without touching
    /// the store. Failures of individual operations are recorded on those
    /// operations; only a store failure aborts the pass.
    pub async fn run_pass(&self) -> SyncOutcome {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Sync pass already running; skipping");
            return SyncOutcome::skipped(SkipReason::AlreadyRunning);
        }
        let _guard = PassGuard(&self.in_progress);

        if !self.connectivity.is_online() {
            tracing::debug!("Offline; skipping sync pass");
            return SyncOutcome::skipped(SkipReason::Offline);
        }

        self.bus.publish(&SyncEvent::Started);

        let mut outcome = SyncOutcome::default();
        match self.drain(&mut outcome).await {
            Ok(()) => {
                outcome.success = true;
                tracing::info!(
                    synced = outcome.synced,
                    failed = outcome.failed,
                    conflicts = outcome.conflicts,
                    "Sync pass completed"
                );
                self.bus.publish(&SyncEvent::Completed {
                    synced: outcome.synced,
                    failed: outcome.failed,
                    conflicts: outcome.conflicts,
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Sync pass aborted");
                outcome.error = Some(e.to_string());
                self.bus.publish(&SyncEvent::Error {
                    message: e.to_string(),
                });
            }
        }

        outcome
    }

    async fn drain(&self, outcome: &mut SyncOutcome) -> Result<()> {
        let batch = self.select_batch(self.clock.now()).await?;
        let total = batch.len();
        tracing::info!(total, "Sync pass started");

        for (index, mut operation) in batch.into_iter().enumerate() {
            operation.status = OperationStatus::InProgress;
            self.store.save(&operation).await?;

            let result = self.executor.execute(&operation).await;
            let now = self.clock.now();

            match result {
                ExecutionOutcome::Success { .. } => {
                    operation.status = OperationStatus::Completed;
                    self.store.save(&operation).await?;
                    self.store.remove(&operation.id).await?;
                    outcome.synced += 1;
                    tracing::debug!(op_id = %operation.id, op_type = %operation.op_type, "Operation synced");
                }
                ExecutionOutcome::Conflict { server_payload } => {
                    self.executor
                        .apply_conflict(&mut operation, server_payload, now);
                    self.store.save(&operation).await?;
                    outcome.conflicts += 1;
                    tracing::info!(op_id = %operation.id, op_type = %operation.op_type, "Operation in conflict");
                }
                ExecutionOutcome::Failure { error, retryable } => {
                    let terminal =
                        self.executor
                            .apply_failure(&mut operation, error, retryable, now);
                    self.store.save(&operation).await?;
                    outcome.failed += 1;

                    if terminal {
                        tracing::warn!(
                            op_id = %operation.id,
                            retry_count = operation.retry_count,
                            error = ?operation.last_error,
                            "Operation failed permanently"
                        );
                    } else {
                        tracing::debug!(
                            op_id = %operation.id,
                            retry_count = operation.retry_count,
                            next_retry_at = operation.next_retry_at,
                            "Operation failed; retry scheduled"
                        );
                    }
                }
            }

            self.bus.publish(&SyncEvent::Progress {
                completed: index + 1,
                total,
                operation_id: operation.id.clone(),
                status: operation.status,
                retry_count: operation.retry_count,
            });
        }

        Ok(())
    }

    async fn select_batch(&self, now: Timestamp) -> Result<Vec<Operation>> {
        // A pass that stopped between marking and removing leaves these behind.
        self.store.purge_completed().await?;
        let mut operations = self.store.list_pending().await?;

        // Only one pass runs at a time, so anything still marked in progress
        // was left behind by an interrupted process.
        for operation in operations
            .iter_mut()
            .filter(|op| op.status == OperationStatus::InProgress)
        {
            tracing::warn!(op_id = %operation.id, "Recovering interrupted operation");
            operation.status = OperationStatus::Pending;
            self.store.save(operation).await?;
        }

        Ok(plan_pass(operations, now))
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("in_progress", &self.in_progress())
            .finish_non_exhaustive()
    }
}
