//! Progress Bus - fan-out of sync lifecycle events.
//!
//! Listeners are plain callbacks. Each delivery is isolated: a listener that
//! panics is logged and skipped, and the remaining listeners still receive
//! the event.

use crate::{OperationId, OperationStatus};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Event emitted while a sync pass runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncEvent {
    /// A pass began.
    Started,
    /// One operation finished its attempt.
    #[serde(rename_all = "camelCase")]
    Progress {
        completed: usize,
        total: usize,
        operation_id: OperationId,
        status: OperationStatus,
        retry_count: u32,
    },
    /// A pass finished.
    Completed {
        synced: usize,
        failed: usize,
        conflicts: usize,
    },
    /// A pass aborted on a structural failure.
    Error { message: String },
}

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    by_id: DashMap<u64, Listener>,
}

/// Registry of progress listeners.
#[derive(Clone, Default)]
pub struct ProgressBus {
    inner: Arc<Listeners>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It stays registered until
    /// [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.by_id.insert(id, Arc::new(callback));
        tracing::debug!(listener = id, "Progress listener registered");

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every listener, in subscription order.
    pub fn publish(&self, event: &SyncEvent) {
        // Snapshot first so callbacks run without holding map locks and may
        // subscribe or unsubscribe themselves.
        let mut listeners: Vec<(u64, Listener)> = self
            .inner
            .by_id
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        listeners.sort_by_key(|(id, _)| *id);

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(listener = id, ?event, "Progress listener panicked");
            }
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.by_id.len()
    }
}

impl std::fmt::Debug for ProgressBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle returned by [`ProgressBus::subscribe`].
#[derive(Debug)]
#[must_use = "dropping a Subscription keeps the listener registered; call unsubscribe() to remove it"]
pub struct Subscription {
    id: u64,
    bus: Weak<Listeners>,
}

impl Subscription {
    /// Remove the listener. Safe to call after the bus is gone.
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.by_id.remove(&self.id);
            tracing::debug!(listener = self.id, "Progress listener unregistered");
        }
    }
}
