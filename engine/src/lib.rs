//! # FamSync Engine
//!
//! An offline-first operation queue and sync engine.
//!
//! Callers enqueue mutations (create/update/delete of children, calendar
//! events, family-time activities, and profile updates) whether or not the
//! device is online. Each one is persisted before `enqueue` returns and
//! replayed against the remote store once connectivity allows, with bounded
//! retries and explicit conflict resolution.
//!
//! ## Design Principles
//!
//! - **No lost intent**: an operation ends `COMPLETED` (and removed), visibly
//!   `FAILED`, or visibly in `CONFLICT`. It is never silently dropped
//! - **One pass at a time**: a single-flight flag per engine guards the queue
//! - **Ordered**: higher priority first, FIFO within a priority
//! - **Collaborators at the edges**: storage, remote adapters, read-cache,
//!   connectivity, and time are injected traits
//!
//! ## Core Concepts
//!
//! ### Operations
//!
//! An [`Operation`] carries an [`OperationType`], an opaque JSON payload, the
//! owner, its priority and retry bookkeeping. Status moves through
//! `PENDING → IN_PROGRESS → {COMPLETED, PENDING (retry), FAILED, CONFLICT}`.
//!
//! ### Sync passes
//!
//! The [`SyncOrchestrator`] drains due `PENDING` operations in order, hands
//! each to the [`OperationExecutor`], and records the outcome. Failures back
//! off exponentially ([`BackoffPolicy`]) until the retry budget is spent.
//!
//! ### Conflicts
//!
//! When an adapter reports that the remote diverged, the operation is parked
//! with both payloads until [`SyncEngine::resolve`] is called with a
//! [`Resolution`]: `use_local`, `use_server`, or `merge`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use famsync_engine::{
//!     AdapterRegistry, EnqueueOptions, OperationType, RecordType, SqliteKv, SyncEngine,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run(child_adapter: Arc<dyn famsync_engine::RemoteAdapter>) -> famsync_engine::error::Result<()> {
//! let engine = SyncEngine::builder()
//!     .persistence(Arc::new(SqliteKv::connect("sqlite://queue.db").await?))
//!     .adapters(AdapterRegistry::new().with(RecordType::Child, child_adapter))
//!     .build()?;
//!
//! let _listener = engine.spawn_reconnect_listener();
//!
//! engine
//!     .enqueue(
//!         OperationType::CreateChild,
//!         json!({"firstName": "Ana"}),
//!         EnqueueOptions::for_owner("user-1"),
//!     )
//!     .await?;
//!
//! let outcome = engine.run_sync_pass().await;
//! println!("synced {} operations", outcome.synced);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod backoff;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod executor;
pub mod operation;
pub mod orchestrator;
pub mod persistence;
pub mod progress;
pub mod store;

// Re-export main types at crate root
pub use adapter::{
    AdapterError, AdapterRegistry, AdapterResult, CacheError, MemoryCache, ReadCache,
    RemoteAdapter,
};
pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use conflict::{ConflictRegistry, Resolution};
pub use connectivity::{Connectivity, NetworkMonitor};
pub use engine::{EngineStatus, SyncEngine, SyncEngineBuilder};
pub use error::Error;
pub use executor::{ExecutionOutcome, OperationExecutor};
pub use operation::{
    Action, ConflictData, EnqueueOptions, Operation, OperationStatus, OperationType, RecordType,
};
pub use orchestrator::{plan_pass, SkipReason, SyncOrchestrator, SyncOutcome};
pub use persistence::{KvStore, MemoryKv, SqliteKv};
pub use progress::{ProgressBus, Subscription, SyncEvent};
pub use store::{OperationStore, QueueStats};

/// Type aliases for clarity
pub type OperationId = String;
pub type OwnerId = String;
pub type Timestamp = u64;
