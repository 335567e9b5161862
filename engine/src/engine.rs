//! The engine facade handed to callers.
//!
//! [`SyncEngine`] wires the store, executor, conflict registry, orchestrator
//! and progress bus together and exposes the caller-facing surface. It is
//! cheap to clone; every clone drives the same queue and shares the same
//! single-flight flag.

use crate::adapter::{AdapterRegistry, MemoryCache, ReadCache};
use crate::connectivity::{Connectivity, NetworkMonitor};
use crate::persistence::KvStore;
use crate::progress::{ProgressBus, SyncEvent, Subscription};
use crate::{
    error::Result, Clock, ConflictRegistry, EngineConfig, EnqueueOptions, Error, Operation,
    OperationExecutor, OperationId, OperationStatus, OperationStore, OperationType, QueueStats,
    Resolution, SyncOrchestrator, SyncOutcome, SystemClock,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

/// Snapshot of the engine's runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub in_progress: bool,
    pub is_online: bool,
}

struct EngineInner {
    config: EngineConfig,
    store: OperationStore,
    executor: OperationExecutor,
    /// Next enqueue sequence, seeded from the store on first enqueue
    sequence: OnceCell<AtomicU64>,
    orchestrator: SyncOrchestrator,
    conflicts: ConflictRegistry,
    bus: ProgressBus,
    connectivity: Arc<dyn Connectivity>,
    clock: Arc<dyn Clock>,
}

/// Offline-first operation queue with background sync.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Queue a mutation.
    ///
    /// The operation is durable once this returns. When online (and
    /// `sync_on_enqueue` is set) a pass is started in the background; the
    /// caller never waits on the network.
    pub async fn enqueue(
        &self,
        op_type: OperationType,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<OperationId> {
        if options.owner_id.trim().is_empty() {
            return Err(Error::MissingOwner);
        }
        let record_type = op_type.record_type();
        if !self.inner.executor.supports(record_type) {
            return Err(Error::NoAdapter(record_type));
        }

        let config = &self.inner.config;
        let sequence = self.next_sequence().await?;
        let mut operation = Operation::new(
            uuid::Uuid::new_v4().to_string(),
            op_type,
            payload,
            options.owner_id,
            self.inner.clock.now(),
        )
        .with_priority(options.priority.unwrap_or(config.default_priority))
        .with_max_retries(options.max_retries.unwrap_or(config.default_max_retries))
        .with_sequence(sequence);
        operation.metadata = options.metadata;

        let id = self.inner.store.enqueue(&operation).await?;
        tracing::info!(
            op_id = %id,
            op_type = %operation.op_type,
            owner_id = %operation.owner_id,
            priority = operation.priority,
            "Operation enqueued"
        );

        if config.sync_on_enqueue && self.inner.connectivity.is_online() {
            self.spawn_pass();
        }

        Ok(id)
    }

    /// [`SyncEngine::enqueue`] with the operation type given by name
    /// (`create_child`, `update-calendar-event`, ...).
    pub async fn enqueue_named(
        &self,
        op_type: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<OperationId> {
        let op_type = op_type.parse()?;
        self.enqueue(op_type, payload, options).await
    }

    /// Run a sync pass now and wait for it.
    pub async fn run_sync_pass(&self) -> SyncOutcome {
        self.inner.orchestrator.run_pass().await
    }

    /// Settle a conflicted operation.
    pub async fn resolve(
        &self,
        operation_id: &str,
        resolution: Resolution,
        merged_payload: Option<serde_json::Value>,
    ) -> Result<()> {
        self.inner
            .conflicts
            .resolve(operation_id, resolution, merged_payload)
            .await
    }

    /// [`SyncEngine::resolve`] with the resolution given by name.
    pub async fn resolve_named(
        &self,
        operation_id: &str,
        resolution: &str,
        merged_payload: Option<serde_json::Value>,
    ) -> Result<()> {
        self.inner
            .conflicts
            .resolve_named(operation_id, resolution, merged_payload)
            .await
    }

    /// Listen to sync lifecycle events.
    pub fn subscribe_to_progress<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(callback)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            in_progress: self.inner.orchestrator.in_progress(),
            is_online: self.inner.connectivity.is_online(),
        }
    }

    /// Delete every terminally failed operation. Returns how many were removed.
    pub async fn clear_terminal_failures(&self) -> Result<usize> {
        let failures = self.failures().await?;
        for operation in &failures {
            self.inner.store.remove(&operation.id).await?;
        }

        if !failures.is_empty() {
            tracing::info!(cleared = failures.len(), "Cleared terminal failures");
        }
        Ok(failures.len())
    }

    /// Operations waiting on a conflict resolution.
    pub async fn conflicts(&self) -> Result<Vec<Operation>> {
        self.inner.conflicts.list().await
    }

    /// Terminally failed operations, kept for inspection.
    pub async fn failures(&self) -> Result<Vec<Operation>> {
        self.inner
            .store
            .list_by_status(OperationStatus::Failed)
            .await
    }

    /// Look up a queued operation.
    pub async fn get(&self, operation_id: &str) -> Result<Option<Operation>> {
        self.inner.store.get(operation_id).await
    }

    /// Storage keys of records that no longer decode. They are never synced
    /// and stay until removed from the backing store.
    pub async fn undecodable_records(&self) -> Result<Vec<String>> {
        self.inner.store.undecodable().await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.inner.store.stats().await
    }

    /// Start a background task that runs a pass whenever connectivity
    /// comes back. The task stops once the engine or the connectivity
    /// source is dropped, or when the returned handle is aborted.
    pub fn spawn_reconnect_listener(&self) -> JoinHandle<()> {
        let engine = Arc::downgrade(&self.inner);
        let mut rx = self.inner.connectivity.watch();

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                let Some(inner) = engine.upgrade() else {
                    break;
                };
                if online && inner.config.sync_on_reconnect {
                    tracing::info!("Back online; starting sync pass");
                    inner.orchestrator.run_pass().await;
                }
            }
            tracing::debug!("Reconnect listener stopped");
        })
    }

    async fn next_sequence(&self) -> Result<u64> {
        let store = &self.inner.store;
        let counter = self
            .inner
            .sequence
            .get_or_try_init(|| async {
                let next = store.max_sequence().await?.map_or(0, |max| max + 1);
                Ok::<_, Error>(AtomicU64::new(next))
            })
            .await?;
        Ok(counter.fetch_add(1, Ordering::SeqCst))
    }

    fn spawn_pass(&self) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_sync_pass().await;
        });
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`SyncEngine`] from its collaborators.
#[derive(Default)]
pub struct SyncEngineBuilder {
    config: EngineConfig,
    persistence: Option<Arc<dyn KvStore>>,
    adapters: AdapterRegistry,
    cache: Option<Arc<dyn ReadCache>>,
    connectivity: Option<Arc<dyn Connectivity>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SyncEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Durable storage for the queue. Required.
    pub fn persistence(mut self, persistence: Arc<dyn KvStore>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    /// Read-cache refreshed on success. Defaults to a [`MemoryCache`].
    pub fn cache(mut self, cache: Arc<dyn ReadCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Connectivity source. Defaults to an always-online [`NetworkMonitor`].
    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Time source. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<SyncEngine> {
        let persistence = self
            .persistence
            .ok_or_else(|| Error::InvalidConfig("persistence is required".to_string()))?;
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryCache::new()) as Arc<dyn ReadCache>);
        let connectivity = self
            .connectivity
            .unwrap_or_else(|| Arc::new(NetworkMonitor::new(true)) as Arc<dyn Connectivity>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        let store = OperationStore::new(persistence);
        let executor = OperationExecutor::new(self.adapters, cache, self.config.backoff());
        let bus = ProgressBus::new();
        let conflicts = ConflictRegistry::new(store.clone(), executor.clone(), clock.clone());
        let orchestrator = SyncOrchestrator::new(
            store.clone(),
            executor.clone(),
            bus.clone(),
            connectivity.clone(),
            clock.clone(),
        );

        Ok(SyncEngine {
            inner: Arc::new(EngineInner {
                config: self.config,
                store,
                executor,
                sequence: OnceCell::new(),
                orchestrator,
                conflicts,
                bus,
                connectivity,
                clock,
            }),
        })
    }
}
