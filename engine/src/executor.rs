//! Operation Executor - runs one queued operation against its adapter.
//!
//! The executor turns an adapter call into one of three outcomes the
//! orchestrator understands (success, conflict, failure). On success it also
//! mirrors the result into the read-cache; a cache failure is logged and
//! never changes the outcome.

use crate::adapter::{AdapterError, AdapterRegistry, ReadCache};
use crate::operation::record_id_of;
use crate::{Action, BackoffPolicy, ConflictData, Operation, OperationStatus, Timestamp};
use std::sync::Arc;

/// Result of executing one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The remote accepted the mutation.
    Success { data: Option<serde_json::Value> },
    /// The remote diverged; both versions are needed to resolve.
    Conflict { server_payload: serde_json::Value },
    /// The attempt failed.
    Failure { error: String, retryable: bool },
}

/// Dispatches operations to adapters and applies retry scheduling.
#[derive(Clone)]
pub struct OperationExecutor {
    adapters: AdapterRegistry,
    cache: Arc<dyn ReadCache>,
    backoff: BackoffPolicy,
}

impl OperationExecutor {
    pub fn new(adapters: AdapterRegistry, cache: Arc<dyn ReadCache>, backoff: BackoffPolicy) -> Self {
        Self {
            adapters,
            cache,
            backoff,
        }
    }

    /// Whether an adapter is registered for `record_type`.
    pub fn supports(&self, record_type: crate::RecordType) -> bool {
        self.adapters.contains(record_type)
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Execute `operation` against the adapter for its record type.
    pub async fn execute(&self, operation: &Operation) -> ExecutionOutcome {
        let record_type = operation.op_type.record_type();
        // Enqueue rejects unsupported types; this catches records persisted
        // under a different adapter set.
        let Some(adapter) = self.adapters.get(record_type) else {
            return ExecutionOutcome::Failure {
                error: crate::Error::NoAdapter(record_type).to_string(),
                retryable: false,
            };
        };

        let action = operation.op_type.action();
        let result = match action {
            Action::Create => adapter.create(&operation.payload).await,
            Action::Update => adapter.update(&operation.payload).await,
            Action::Delete => adapter.delete(&operation.payload).await,
        };

        match result {
            Ok(data) => {
                self.refresh_cache(operation, action, data.as_ref()).await;
                ExecutionOutcome::Success { data }
            }
            Err(AdapterError::Conflict { server_data }) => ExecutionOutcome::Conflict {
                server_payload: server_data,
            },
            Err(e) => ExecutionOutcome::Failure {
                retryable: e.is_retryable(),
                error: e.to_string(),
            },
        }
    }

    /// Record a failed attempt on `operation`.
    ///
    /// Increments the retry count. The operation goes terminal `FAILED` when
    /// the budget is spent or the error is not retryable; otherwise it goes
    /// back to `PENDING`, gated by the backoff delay. Returns `true` if the
    /// failure is terminal.
    pub fn apply_failure(
        &self,
        operation: &mut Operation,
        error: String,
        retryable: bool,
        now: Timestamp,
    ) -> bool {
        operation.retry_count = operation.retry_count.saturating_add(1);
        operation.last_error = Some(error);

        if !retryable || operation.retries_exhausted() {
            operation.status = OperationStatus::Failed;
            return true;
        }

        operation.status = OperationStatus::Pending;
        operation.next_retry_at = now.saturating_add(self.backoff.delay_millis(operation.retry_count));
        false
    }

    /// Move `operation` into `CONFLICT`, keeping both payloads.
    pub fn apply_conflict(
        &self,
        operation: &mut Operation,
        server_payload: serde_json::Value,
        now: Timestamp,
    ) {
        operation.status = OperationStatus::Conflict;
        operation.conflict_data = Some(ConflictData {
            local_payload: operation.payload.clone(),
            server_payload,
            detected_at: now,
        });
    }

    /// Write the server's version of a record straight into the cache.
    pub async fn write_server_version(&self, operation: &Operation, server_payload: &serde_json::Value) {
        let record_id = record_id_of(server_payload).or_else(|| operation.record_id());
        let Some(key) = self.cache_key(operation, record_id) else {
            tracing::warn!(op_id = %operation.id, "No record id for server payload; cache not updated");
            return;
        };

        if let Err(e) = self.cache.write(&key, server_payload).await {
            tracing::warn!(op_id = %operation.id, key = %key, error = %e, "Failed to cache server version");
        }
    }

    async fn refresh_cache(
        &self,
        operation: &Operation,
        action: Action,
        data: Option<&serde_json::Value>,
    ) {
        let record_id = data
            .and_then(record_id_of)
            .or_else(|| operation.record_id());
        let Some(key) = self.cache_key(operation, record_id) else {
            tracing::debug!(op_id = %operation.id, "No record id in result; cache not refreshed");
            return;
        };

        let result = match action {
            Action::Delete => self.cache.remove(&key).await,
            Action::Create | Action::Update => {
                let value = data.unwrap_or(&operation.payload);
                self.cache.write(&key, value).await
            }
        };

        if let Err(e) = result {
            tracing::warn!(op_id = %operation.id, key = %key, error = %e, "Read-cache refresh failed");
        }
    }

    fn cache_key(&self, operation: &Operation, record_id: Option<&str>) -> Option<String> {
        let record_type = operation.op_type.record_type();
        match record_id {
            Some(id) => Some(record_type.cache_key(id)),
            // A profile is identified by its owner
            None if record_type == crate::RecordType::UserProfile => {
                Some(record_type.cache_key(&operation.owner_id))
            }
            None => None,
        }
    }
}

impl std::fmt::Debug for OperationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationExecutor")
            .field("adapters", &self.adapters)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterResult, MemoryCache, RemoteAdapter};
    use crate::{OperationType, RecordType};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Adapter returning a fixed response and remembering which call was made.
    struct FixedAdapter {
        response: AdapterResult,
        calls: Mutex<Vec<&'static str>>,
    }

    impl FixedAdapter {
        fn new(response: AdapterResult) -> Arc<Self> {
            Arc::new(Self {
                response,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RemoteAdapter for FixedAdapter {
        async fn create(&self, _payload: &serde_json::Value) -> AdapterResult {
            self.calls.lock().unwrap().push("create");
            self.response.clone()
        }

        async fn update(&self, _payload: &serde_json::Value) -> AdapterResult {
            self.calls.lock().unwrap().push("update");
            self.response.clone()
        }

        async fn delete(&self, _payload: &serde_json::Value) -> AdapterResult {
            self.calls.lock().unwrap().push("delete");
            self.response.clone()
        }
    }

    fn executor_with(
        record_type: RecordType,
        adapter: Arc<FixedAdapter>,
    ) -> (OperationExecutor, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new());
        let registry = AdapterRegistry::new().with(record_type, adapter);
        (
            OperationExecutor::new(registry, cache.clone(), BackoffPolicy::default()),
            cache,
        )
    }

    fn op(op_type: OperationType, payload: serde_json::Value) -> Operation {
        Operation::new("op-1", op_type, payload, "user-1", 1000)
    }

    #[tokio::test]
    async fn create_success_writes_cache() {
        let adapter = FixedAdapter::new(Ok(Some(json!({"id": "c1", "firstName": "Ana"}))));
        let (executor, cache) = executor_with(RecordType::Child, adapter.clone());

        let outcome = executor
            .execute(&op(OperationType::CreateChild, json!({"firstName": "Ana"})))
            .await;

        assert!(matches!(outcome, ExecutionOutcome::Success { .. }));
        assert_eq!(*adapter.calls.lock().unwrap(), vec!["create"]);
        assert_eq!(
            cache.get("child:c1"),
            Some(json!({"id": "c1", "firstName": "Ana"}))
        );
    }

    #[tokio::test]
    async fn update_without_returned_item_caches_payload() {
        let adapter = FixedAdapter::new(Ok(None));
        let (executor, cache) = executor_with(RecordType::CalendarEvent, adapter.clone());

        let payload = json!({"id": "e1", "title": "Dentist"});
        executor
            .execute(&op(OperationType::UpdateCalendarEvent, payload.clone()))
            .await;

        assert_eq!(*adapter.calls.lock().unwrap(), vec!["update"]);
        assert_eq!(cache.get("calendar_event:e1"), Some(payload));
    }

    #[tokio::test]
    async fn delete_success_evicts_cache() {
        let adapter = FixedAdapter::new(Ok(None));
        let (executor, cache) = executor_with(RecordType::FamilyTimeActivity, adapter.clone());
        cache
            .write("family_time_activity:a1", &json!({"id": "a1"}))
            .await
            .unwrap();

        executor
            .execute(&op(
                OperationType::DeleteFamilyTimeActivity,
                json!({"id": "a1"}),
            ))
            .await;

        assert_eq!(*adapter.calls.lock().unwrap(), vec!["delete"]);
        assert!(cache.get("family_time_activity:a1").is_none());
    }

    #[tokio::test]
    async fn user_profile_keyed_by_owner() {
        let adapter = FixedAdapter::new(Ok(None));
        let (executor, cache) = executor_with(RecordType::UserProfile, adapter);

        executor
            .execute(&op(
                OperationType::UpdateUserProfile,
                json!({"displayName": "Sam"}),
            ))
            .await;

        assert_eq!(
            cache.get("user_profile:user-1"),
            Some(json!({"displayName": "Sam"}))
        );
    }

    #[tokio::test]
    async fn cache_failure_does_not_fail_sync() {
        let adapter = FixedAdapter::new(Ok(Some(json!({"id": "c1"}))));
        let (executor, cache) = executor_with(RecordType::Child, adapter);
        cache.set_failing(true);

        let outcome = executor
            .execute(&op(OperationType::CreateChild, json!({})))
            .await;

        assert_eq!(
            outcome,
            ExecutionOutcome::Success {
                data: Some(json!({"id": "c1"}))
            }
        );
    }

    #[tokio::test]
    async fn conflict_outcome_carries_server_payload() {
        let adapter = FixedAdapter::new(Err(AdapterError::Conflict {
            server_data: json!({"id": "c1", "firstName": "Anna"}),
        }));
        let (executor, cache) = executor_with(RecordType::Child, adapter);

        let outcome = executor
            .execute(&op(OperationType::UpdateChild, json!({"id": "c1"})))
            .await;

        assert_eq!(
            outcome,
            ExecutionOutcome::Conflict {
                server_payload: json!({"id": "c1", "firstName": "Anna"})
            }
        );
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn failure_classification() {
        let adapter = FixedAdapter::new(Err(AdapterError::Timeout));
        let (executor, _) = executor_with(RecordType::Child, adapter);
        let outcome = executor
            .execute(&op(OperationType::CreateChild, json!({})))
            .await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failure {
                retryable: true,
                ..
            }
        ));

        let adapter = FixedAdapter::new(Err(AdapterError::Rejected("invalid".into())));
        let (executor, _) = executor_with(RecordType::Child, adapter);
        let outcome = executor
            .execute(&op(OperationType::CreateChild, json!({})))
            .await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failure {
                retryable: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_adapter_is_terminal_failure() {
        let adapter = FixedAdapter::new(Ok(None));
        let (executor, _) = executor_with(RecordType::Child, adapter);

        let outcome = executor
            .execute(&op(OperationType::CreateCalendarEvent, json!({})))
            .await;

        assert!(matches!(
            outcome,
            ExecutionOutcome::Failure {
                retryable: false,
                ..
            }
        ));
    }

    #[test]
    fn apply_failure_schedules_backoff() {
        let (executor, _) = executor_with(RecordType::Child, FixedAdapter::new(Ok(None)));
        let mut op = op(OperationType::CreateChild, json!({}));

        let terminal = executor.apply_failure(&mut op, "timeout".into(), true, 10_000);
        assert!(!terminal);
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 1);
        assert_eq!(op.next_retry_at, 12_000);
        assert_eq!(op.last_error.as_deref(), Some("timeout"));

        let terminal = executor.apply_failure(&mut op, "timeout".into(), true, 12_000);
        assert!(!terminal);
        assert_eq!(op.next_retry_at, 16_000);

        let terminal = executor.apply_failure(&mut op, "timeout".into(), true, 16_000);
        assert!(terminal);
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.retry_count, 3);
    }

    #[test]
    fn non_retryable_failure_is_terminal_immediately() {
        let (executor, _) = executor_with(RecordType::Child, FixedAdapter::new(Ok(None)));
        let mut op = op(OperationType::CreateChild, json!({}));

        assert!(executor.apply_failure(&mut op, "rejected".into(), false, 10_000));
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.retry_count, 1);
    }

    #[test]
    fn apply_conflict_keeps_both_sides() {
        let (executor, _) = executor_with(RecordType::Child, FixedAdapter::new(Ok(None)));
        let mut op = op(OperationType::UpdateChild, json!({"id": "c1", "firstName": "Ana"}));

        executor.apply_conflict(&mut op, json!({"id": "c1", "firstName": "Anna"}), 5000);

        assert_eq!(op.status, OperationStatus::Conflict);
        let conflict = op.conflict_data.unwrap();
        assert_eq!(conflict.local_payload, json!({"id": "c1", "firstName": "Ana"}));
        assert_eq!(conflict.server_payload, json!({"id": "c1", "firstName": "Anna"}));
        assert_eq!(conflict.detected_at, 5000);
    }
}
