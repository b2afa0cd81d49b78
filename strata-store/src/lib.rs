//! Strata Store - Key-Value Backend Abstraction
//!
//! Defines the connection contract the cache layer runs against plus an
//! in-memory implementation of it. Everything here speaks raw bytes;
//! entry envelopes and codecs live in strata-core.

pub mod conn;
pub mod error;
pub mod memory;
pub mod pool;
pub mod value;

pub use conn::{StoreClient, StoreConnection};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryConnection, MemoryStore};
pub use pool::{ConnectionPool, PoolOptions};

// Re-export batch types for transaction callers
pub use value::{Command, CommandBatch, Reply};
