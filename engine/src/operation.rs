//! Queued operation records.
//!
//! A caller's intent to mutate remote state is captured as an [`Operation`]
//! and persisted before anything touches the network. The record carries its
//! own retry bookkeeping and, when the remote has diverged, both sides of the
//! conflict.

use crate::{Error, OperationId, OwnerId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of record an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Child,
    CalendarEvent,
    FamilyTimeActivity,
    UserProfile,
}

impl RecordType {
    /// Prefix used for read-cache keys of this record type.
    pub fn cache_prefix(&self) -> &'static str {
        match self {
            RecordType::Child => "child",
            RecordType::CalendarEvent => "calendar_event",
            RecordType::FamilyTimeActivity => "family_time_activity",
            RecordType::UserProfile => "user_profile",
        }
    }

    /// Read-cache key for a record of this type.
    pub fn cache_key(&self, record_id: &str) -> String {
        format!("{}:{}", self.cache_prefix(), record_id)
    }
}

/// Mutation applied to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

/// The fixed set of mutations the queue accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    CreateChild,
    UpdateChild,
    DeleteChild,
    CreateCalendarEvent,
    UpdateCalendarEvent,
    DeleteCalendarEvent,
    CreateFamilyTimeActivity,
    UpdateFamilyTimeActivity,
    DeleteFamilyTimeActivity,
    UpdateUserProfile,
}

impl OperationType {
    pub const ALL: [OperationType; 10] = [
        OperationType::CreateChild,
        OperationType::UpdateChild,
        OperationType::DeleteChild,
        OperationType::CreateCalendarEvent,
        OperationType::UpdateCalendarEvent,
        OperationType::DeleteCalendarEvent,
        OperationType::CreateFamilyTimeActivity,
        OperationType::UpdateFamilyTimeActivity,
        OperationType::DeleteFamilyTimeActivity,
        OperationType::UpdateUserProfile,
    ];

    /// The record type this mutation targets.
    pub fn record_type(&self) -> RecordType {
        match self {
            OperationType::CreateChild | OperationType::UpdateChild | OperationType::DeleteChild => {
                RecordType::Child
            }
            OperationType::CreateCalendarEvent
            | OperationType::UpdateCalendarEvent
            | OperationType::DeleteCalendarEvent => RecordType::CalendarEvent,
            OperationType::CreateFamilyTimeActivity
            | OperationType::UpdateFamilyTimeActivity
            | OperationType::DeleteFamilyTimeActivity => RecordType::FamilyTimeActivity,
            OperationType::UpdateUserProfile => RecordType::UserProfile,
        }
    }

    /// The mutation this type performs.
    pub fn action(&self) -> Action {
        match self {
            OperationType::CreateChild
            | OperationType::CreateCalendarEvent
            | OperationType::CreateFamilyTimeActivity => Action::Create,
            OperationType::UpdateChild
            | OperationType::UpdateCalendarEvent
            | OperationType::UpdateFamilyTimeActivity
            | OperationType::UpdateUserProfile => Action::Update,
            OperationType::DeleteChild
            | OperationType::DeleteCalendarEvent
            | OperationType::DeleteFamilyTimeActivity => Action::Delete,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::CreateChild => "create_child",
            OperationType::UpdateChild => "update_child",
            OperationType::DeleteChild => "delete_child",
            OperationType::CreateCalendarEvent => "create_calendar_event",
            OperationType::UpdateCalendarEvent => "update_calendar_event",
            OperationType::DeleteCalendarEvent => "delete_calendar_event",
            OperationType::CreateFamilyTimeActivity => "create_family_time_activity",
            OperationType::UpdateFamilyTimeActivity => "update_family_time_activity",
            OperationType::DeleteFamilyTimeActivity => "delete_family_time_activity",
            OperationType::UpdateUserProfile => "update_user_profile",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_lowercase();
        OperationType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == normalized)
            .ok_or_else(|| Error::UnknownOperationType(s.to_string()))
    }
}

/// Lifecycle state of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Conflict,
}

/// Both sides of a detected conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictData {
    /// Payload the local mutation was built on
    pub local_payload: serde_json::Value,
    /// Payload the remote store currently holds
    pub server_payload: serde_json::Value,
    /// When the conflict was detected
    pub detected_at: Timestamp,
}

/// Caller-supplied options for [`crate::SyncEngine::enqueue`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnqueueOptions {
    /// The user whose data this operation affects
    pub owner_id: OwnerId,
    /// Overrides the configured default retry budget
    pub max_retries: Option<u32>,
    /// Overrides the configured default priority (higher runs first)
    pub priority: Option<i32>,
    /// Opaque data carried alongside the operation
    pub metadata: Option<serde_json::Value>,
}

impl EnqueueOptions {
    pub fn for_owner(owner_id: impl Into<OwnerId>) -> Self {
        Self {
            owner_id: owner_id.into(),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Unique, never reused
    pub id: OperationId,
    /// Mutation kind, immutable
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Adapter input
    pub payload: serde_json::Value,
    /// User whose data is affected
    pub owner_id: OwnerId,
    /// When the operation was enqueued
    pub enqueued_at: Timestamp,
    /// Enqueue order within one engine; orders operations sharing a timestamp
    #[serde(default)]
    pub sequence: u64,
    pub status: OperationStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Higher runs first
    pub priority: i32,
    /// Not eligible before this time
    pub next_retry_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_data: Option<ConflictData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Operation {
    /// Create a new pending operation, immediately eligible.
    pub fn new(
        id: impl Into<OperationId>,
        op_type: OperationType,
        payload: serde_json::Value,
        owner_id: impl Into<OwnerId>,
        enqueued_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            op_type,
            payload,
            owner_id: owner_id.into(),
            enqueued_at,
            sequence: 0,
            status: OperationStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            priority: 1,
            next_retry_at: enqueued_at,
            last_error: None,
            conflict_data: None,
            metadata: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Whether a sync pass at `now` should pick this operation up.
    ///
    /// `FAILED` is terminal here: a failure with retries left is stored back
    /// as `PENDING` with a future `next_retry_at`.
    pub fn is_eligible(&self, now: Timestamp) -> bool {
        self.status == OperationStatus::Pending && self.next_retry_at <= now
    }

    /// Whether the retry budget is spent.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Whether the operation is `FAILED` with no way back except clearing.
    pub fn is_terminal_failure(&self) -> bool {
        self.status == OperationStatus::Failed
    }

    /// Record identifier carried in the payload, if any.
    pub fn record_id(&self) -> Option<&str> {
        record_id_of(&self.payload)
    }

    /// Put the operation back in the queue for a fresh attempt.
    ///
    /// Used by conflict resolution; the retry budget starts over.
    pub fn restart(&mut self, now: Timestamp) {
        self.status = OperationStatus::Pending;
        self.retry_count = 0;
        self.next_retry_at = now;
        self.conflict_data = None;
        self.last_error = None;
    }
}

/// Extract a record identifier from a payload (`id`, then `recordId`).
pub fn record_id_of(payload: &serde_json::Value) -> Option<&str> {
    payload
        .get("id")
        .or_else(|| payload.get("recordId"))
        .and_then(|v| v.as_str())
}

/// Order in which a sync pass processes operations: higher priority first,
/// then oldest first. Operations enqueued in the same millisecond keep their
/// enqueue sequence; the id only settles records that share both.
pub fn pass_order(a: &Operation, b: &Operation) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.enqueued_at.cmp(&b.enqueued_at))
        .then_with(|| a.sequence.cmp(&b.sequence))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(id: &str, priority: i32, enqueued_at: Timestamp) -> Operation {
        Operation::new(
            id,
            OperationType::CreateChild,
            json!({}),
            "user-1",
            enqueued_at,
        )
        .with_priority(priority)
    }

    #[test]
    fn new_operation_defaults() {
        let op = Operation::new(
            "op-1",
            OperationType::UpdateChild,
            json!({"id": "c1", "firstName": "Ana"}),
            "user-1",
            1000,
        );

        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert_eq!(op.max_retries, 3);
        assert_eq!(op.priority, 1);
        assert_eq!(op.next_retry_at, 1000);
        assert_eq!(op.record_id(), Some("c1"));
    }

    #[test]
    fn type_mapping() {
        assert_eq!(OperationType::CreateChild.record_type(), RecordType::Child);
        assert_eq!(OperationType::CreateChild.action(), Action::Create);
        assert_eq!(
            OperationType::DeleteFamilyTimeActivity.record_type(),
            RecordType::FamilyTimeActivity
        );
        assert_eq!(
            OperationType::DeleteFamilyTimeActivity.action(),
            Action::Delete
        );
        assert_eq!(
            OperationType::UpdateUserProfile.record_type(),
            RecordType::UserProfile
        );
        assert_eq!(OperationType::UpdateUserProfile.action(), Action::Update);
    }

    #[test]
    fn type_parsing_accepts_both_separators() {
        assert_eq!(
            "create-child".parse::<OperationType>().unwrap(),
            OperationType::CreateChild
        );
        assert_eq!(
            "update_calendar_event".parse::<OperationType>().unwrap(),
            OperationType::UpdateCalendarEvent
        );
        assert!(matches!(
            "create-pet".parse::<OperationType>(),
            Err(Error::UnknownOperationType(_))
        ));
    }

    #[test]
    fn type_display_matches_serde() {
        for ty in OperationType::ALL {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty));
        }
    }

    #[test]
    fn cache_keys() {
        assert_eq!(RecordType::Child.cache_key("c1"), "child:c1");
        assert_eq!(
            RecordType::CalendarEvent.cache_key("e9"),
            "calendar_event:e9"
        );
    }

    #[test]
    fn eligibility() {
        let mut op = op("op-1", 1, 1000);
        assert!(op.is_eligible(1000));

        op.next_retry_at = 3000;
        assert!(!op.is_eligible(2999));
        assert!(op.is_eligible(3000));

        op.status = OperationStatus::Conflict;
        assert!(!op.is_eligible(5000));

        op.status = OperationStatus::Failed;
        assert!(!op.is_eligible(5000));
    }

    #[test]
    fn restart_resets_retry_state() {
        let mut op = op("op-1", 1, 1000);
        op.status = OperationStatus::Conflict;
        op.retry_count = 2;
        op.next_retry_at = 9000;
        op.last_error = Some("timeout".into());
        op.conflict_data = Some(ConflictData {
            local_payload: json!({}),
            server_payload: json!({}),
            detected_at: 2000,
        });

        op.restart(4000);

        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert_eq!(op.next_retry_at, 4000);
        assert!(op.conflict_data.is_none());
        assert!(op.last_error.is_none());
    }

    #[test]
    fn pass_order_priority_then_age() {
        let mut ops = vec![
            op("low-old", 1, 1000),
            op("high-new", 5, 3000),
            op("low-new", 1, 2000),
            op("high-old", 5, 1500),
        ];
        ops.sort_by(pass_order);

        let ids: Vec<_> = ops.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["high-old", "high-new", "low-old", "low-new"]);
    }

    #[test]
    fn pass_order_same_millisecond_follows_sequence() {
        // Ids sort opposite to enqueue order.
        let mut ops = vec![
            op("z-create", 1, 1000).with_sequence(7),
            op("a-update", 1, 1000).with_sequence(8),
        ];
        ops.sort_by(pass_order);
        assert_eq!(ops[0].id, "z-create");

        ops.reverse();
        ops.sort_by(pass_order);
        assert_eq!(ops[0].id, "z-create");
    }

    #[test]
    fn sequence_defaults_when_absent() {
        let mut value = serde_json::to_value(op("op-1", 1, 1000).with_sequence(3)).unwrap();
        value.as_object_mut().unwrap().remove("sequence");

        let parsed: Operation = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.sequence, 0);
    }

    #[test]
    fn serialization_format() {
        let op = op("op-1", 1, 1000);
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"type\":\"create_child\""));
        assert!(json.contains("\"status\":\"PENDING\""));
        assert!(json.contains("\"ownerId\""));
        assert!(!json.contains("conflictData"));

        let parsed: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, parsed);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_pass_order_respects_priority_and_fifo(
                entries in prop::collection::vec((0i32..5, 0u64..10_000), 1..40)
            ) {
                let mut ops: Vec<_> = entries
                    .iter()
                    .enumerate()
                    .map(|(i, (priority, at))| op(&format!("op-{i:03}"), *priority, *at))
                    .collect();
                ops.sort_by(pass_order);

                for pair in ops.windows(2) {
                    prop_assert!(pair[0].priority >= pair[1].priority);
                    if pair[0].priority == pair[1].priority {
                        prop_assert!(pair[0].enqueued_at <= pair[1].enqueued_at);
                    }
                }
            }
        }
    }
}
