//! Durable key-value persistence.
//!
//! The operation queue only needs per-key reads and writes plus a prefix
//! scan to enumerate its records. [`KvStore`] is that contract; the engine
//! ships an in-memory implementation and a SQLite one.

mod memory;
mod sqlite;

pub use memory::MemoryKv;
pub use sqlite::SqliteKv;

use crate::error::Result;
use async_trait::async_trait;

/// Key-value persistence backing the operation store.
///
/// Implementations must make `set` and `delete` durable before returning.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite a value.
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All `(key, value)` pairs whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;
}
