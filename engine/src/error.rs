//! Error types for the FamSync engine.

use crate::{OperationId, RecordType};
use thiserror::Error;

/// All possible errors from the FamSync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Caller errors
    #[error("operation not found: {0}")]
    OperationNotFound(OperationId),

    #[error("operation already exists: {0}")]
    DuplicateOperation(OperationId),

    #[error("operation is not in conflict: {0}")]
    NotInConflict(OperationId),

    #[error("merge resolution for {0} requires a merged payload")]
    MissingMergePayload(OperationId),

    #[error("unknown resolution: {0}")]
    UnknownResolution(String),

    #[error("unknown operation type: {0}")]
    UnknownOperationType(String),

    #[error("operation owner must not be empty")]
    MissingOwner,

    #[error("no adapter registered for {}", .0.cache_prefix())]
    NoAdapter(RecordType),

    // Structural errors
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::Persistence(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
