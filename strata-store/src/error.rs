//! Error types for backing-store operations

use std::time::Duration;
use thiserror::Error;

/// Backing-store failures.
///
/// Per-command failures inside a transaction batch do not surface here;
/// they come back as failed replies so the rest of the batch still applies.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("No such key: {key}")]
    MissingKey { key: String },

    #[error("Wrong value type at {key}")]
    WrongType { key: String },

    #[error("Value at {key} is not an integer")]
    NotInteger { key: String },

    #[error("No connection available after {waited:?}")]
    PoolExhausted { waited: Duration },

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Transport failed: {reason}")]
    Transport { reason: String },
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
