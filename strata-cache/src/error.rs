//! Cache-level error taxonomy.
//!
//! Only invalid arguments, transport trouble, corruption, and runaway
//! retry surface as errors. An optimistic put losing its version race, a
//! lock acquisition timing out, and a stale local generation are all
//! ordinary outcomes reported through return values instead.

use strata_core::{CodecError, ConfigError};
use strata_store::StoreError;
use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// A required argument was empty. Named by the parameter at fault.
    #[error("invalid argument: {what} must not be empty")]
    InvalidArgument { what: &'static str },

    #[error("store operation failed: {source}")]
    Store {
        #[from]
        source: StoreError,
    },

    #[error("entry codec failed: {source}")]
    Codec {
        #[from]
        source: CodecError,
    },

    #[error("configuration rejected: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    /// Stored bytes at `key` are not what this cache writes there.
    #[error("corrupt entry at '{key}': {detail}")]
    CorruptEntry { key: String, detail: String },

    /// The generation moved on every attempt. Sustained clearing from
    /// another client is the only way to get here.
    #[error("operation abandoned after {attempts} attempts against a moving generation")]
    RetryExhausted { attempts: u32 },

    /// This region handle already tracks a token for the key.
    #[error("lock already held for key '{key}'")]
    LockHeld { key: String },

    #[error("region '{region}' does not support clearing")]
    ClearUnsupported { region: String },

    #[error("garbage collector unavailable: {reason}")]
    CollectorUnavailable { reason: String },
}
