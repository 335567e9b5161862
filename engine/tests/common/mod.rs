//! Shared helpers for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use famsync_engine::{
    AdapterRegistry, AdapterResult, EngineConfig, ManualClock, MemoryCache, MemoryKv,
    NetworkMonitor, RecordType, RemoteAdapter, SyncEngine, SyncEvent,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};
use tokio::sync::{mpsc, Notify, Semaphore};

static TRACING: Once = Once::new();

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "famsync_engine=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Replays scripted responses in call order; succeeds once the script runs out.
#[derive(Default)]
pub struct ScriptedAdapter {
    responses: Mutex<VecDeque<AdapterResult>>,
    calls: Mutex<Vec<serde_json::Value>>,
}

impl ScriptedAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: AdapterResult) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Payloads the adapter was called with, in order.
    pub fn calls(&self) -> Vec<serde_json::Value> {
        self.calls.lock().unwrap().clone()
    }

    fn respond(&self, payload: &serde_json::Value) -> AdapterResult {
        self.calls.lock().unwrap().push(payload.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(None))
    }
}

#[async_trait]
impl RemoteAdapter for ScriptedAdapter {
    async fn create(&self, payload: &serde_json::Value) -> AdapterResult {
        self.respond(payload)
    }

    async fn update(&self, payload: &serde_json::Value) -> AdapterResult {
        self.respond(payload)
    }

    async fn delete(&self, payload: &serde_json::Value) -> AdapterResult {
        self.respond(payload)
    }
}

/// Blocks every call until a permit is released, announcing each entry.
pub struct GatedAdapter {
    pub entered: Notify,
    pub gate: Semaphore,
    calls: Mutex<usize>,
}

impl GatedAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            gate: Semaphore::new(0),
            calls: Mutex::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    async fn pass_gate(&self) -> AdapterResult {
        *self.calls.lock().unwrap() += 1;
        self.entered.notify_one();
        self.gate
            .acquire()
            .await
            .expect("gate closed")
            .forget();
        Ok(None)
    }
}

#[async_trait]
impl RemoteAdapter for GatedAdapter {
    async fn create(&self, _payload: &serde_json::Value) -> AdapterResult {
        self.pass_gate().await
    }

    async fn update(&self, _payload: &serde_json::Value) -> AdapterResult {
        self.pass_gate().await
    }

    async fn delete(&self, _payload: &serde_json::Value) -> AdapterResult {
        self.pass_gate().await
    }
}

/// An engine over in-memory collaborators, with handles to all of them.
pub struct Harness {
    pub engine: SyncEngine,
    pub kv: Arc<MemoryKv>,
    pub cache: Arc<MemoryCache>,
    pub clock: Arc<ManualClock>,
    pub network: Arc<NetworkMonitor>,
}

/// Config with background passes disabled so tests drive every pass.
pub fn manual_config() -> EngineConfig {
    EngineConfig {
        sync_on_enqueue: false,
        sync_on_reconnect: false,
        ..EngineConfig::default()
    }
}

pub fn harness(config: EngineConfig, adapter: Arc<dyn RemoteAdapter>) -> Harness {
    init_tracing();

    let kv = Arc::new(MemoryKv::new());
    let cache = Arc::new(MemoryCache::new());
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let network = Arc::new(NetworkMonitor::new(true));

    let mut adapters = AdapterRegistry::new();
    for record_type in [
        RecordType::Child,
        RecordType::CalendarEvent,
        RecordType::FamilyTimeActivity,
        RecordType::UserProfile,
    ] {
        adapters.register(record_type, adapter.clone());
    }

    let engine = SyncEngine::builder()
        .config(config)
        .persistence(kv.clone())
        .adapters(adapters)
        .cache(cache.clone())
        .connectivity(network.clone())
        .clock(clock.clone())
        .build()
        .unwrap();

    Harness {
        engine,
        kv,
        cache,
        clock,
        network,
    }
}

/// Forward every progress event into a channel.
pub fn event_channel(engine: &SyncEngine) -> mpsc::UnboundedReceiver<SyncEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _subscription = engine.subscribe_to_progress(move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

/// Wait (bounded) for the next `Completed` event.
pub async fn next_completed(rx: &mut mpsc::UnboundedReceiver<SyncEvent>) -> SyncEvent {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(event @ SyncEvent::Completed { .. }) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for a completed pass")
}
