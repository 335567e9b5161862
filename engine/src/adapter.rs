//! Remote-store adapters and the local read-cache.
//!
//! The engine does not talk to any backend itself. Each record type is
//! served by a [`RemoteAdapter`] registered in an [`AdapterRegistry`] at
//! startup, and successful writes are mirrored into a [`ReadCache`] so the
//! UI can render synced state without reloading.

use crate::RecordType;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a remote-store adapter.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AdapterError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("request throttled")]
    Throttled,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The remote refused the request outright (validation, not found, ...)
    #[error("rejected: {0}")]
    Rejected(String),

    /// The remote state diverged from what the mutation assumed.
    /// Conforming adapters always return the current server version.
    #[error("conflict with server state")]
    Conflict { server_data: serde_json::Value },
}

impl AdapterError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::Network(_)
            | AdapterError::Timeout
            | AdapterError::Throttled
            | AdapterError::Unauthorized(_) => true,
            AdapterError::Rejected(_) | AdapterError::Conflict { .. } => false,
        }
    }
}

/// Adapter call result: the stored item (if the remote returns one) or a failure.
pub type AdapterResult = std::result::Result<Option<serde_json::Value>, AdapterError>;

/// CRUD access to one record type on the remote store.
#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    async fn create(&self, payload: &serde_json::Value) -> AdapterResult;

    async fn update(&self, payload: &serde_json::Value) -> AdapterResult;

    async fn delete(&self, payload: &serde_json::Value) -> AdapterResult;
}

/// Maps each record type to its adapter.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<RecordType, Arc<dyn RemoteAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the adapter for a record type.
    pub fn register(&mut self, record_type: RecordType, adapter: Arc<dyn RemoteAdapter>) {
        self.adapters.insert(record_type, adapter);
    }

    /// Builder-style [`AdapterRegistry::register`].
    pub fn with(mut self, record_type: RecordType, adapter: Arc<dyn RemoteAdapter>) -> Self {
        self.register(record_type, adapter);
        self
    }

    pub fn get(&self, record_type: RecordType) -> Option<&Arc<dyn RemoteAdapter>> {
        self.adapters.get(&record_type)
    }

    pub fn contains(&self, record_type: RecordType) -> bool {
        self.adapters.contains_key(&record_type)
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("record_types", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Failure writing to the read-cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cache error: {0}")]
pub struct CacheError(pub String);

/// Local cache of synced records, read by the UI.
#[async_trait]
pub trait ReadCache: Send + Sync {
    async fn write(&self, key: &str, value: &serde_json::Value) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// In-memory [`ReadCache`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, serde_json::Value>,
    failing: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read back a cached value.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Make writes and removals fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError("cache unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ReadCache for MemoryCache {
    async fn write(&self, key: &str, value: &serde_json::Value) -> Result<(), CacheError> {
        self.check()?;
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.entries.remove(key);
        Ok(())
    }
}
