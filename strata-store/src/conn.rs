//! Connection traits for the backing store.
//!
//! The cache layers talk to storage exclusively through these traits. The
//! in-memory store in this crate is the reference implementation; a
//! networked client satisfies the same contract by mapping each method to
//! its wire command.

use crate::error::StoreResult;
use crate::value::{CommandBatch, Reply};
use std::time::Duration;

/// One client connection to the backing store.
///
/// Connections are single-threaded handles: checkout one from the pool,
/// run an operation's round trips, return it. Watch state is per
/// connection and survives until [`exec`], [`unwatch`], or drop.
///
/// [`exec`]: StoreConnection::exec
/// [`unwatch`]: StoreConnection::unwatch
pub trait StoreConnection: Send {
    fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    fn set(&mut self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Set with a TTL; the entry vanishes once the TTL elapses.
    fn set_ex(&mut self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()>;

    /// Set only if the key is absent. Returns whether the write happened.
    fn set_nx(&mut self, key: &str, value: &[u8]) -> StoreResult<bool>;

    /// Returns whether the key existed.
    fn del(&mut self, key: &str) -> StoreResult<bool>;

    /// One result slot per requested key; non-string values read as absent.
    fn mget(&mut self, keys: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>>;

    /// Atomic counter step, initializing an absent key to zero first.
    fn incr_by(&mut self, key: &str, delta: i64) -> StoreResult<i64>;

    /// Fails with [`StoreError::MissingKey`] when the source is absent.
    ///
    /// [`StoreError::MissingKey`]: crate::error::StoreError::MissingKey
    fn rename(&mut self, from: &str, to: &str) -> StoreResult<()>;

    /// Schedule deletion. A zero TTL deletes immediately. Returns whether
    /// the key existed.
    fn expire(&mut self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Returns whether the member was newly added.
    fn sadd(&mut self, key: &str, member: &[u8]) -> StoreResult<bool>;

    /// Returns whether the member was present.
    fn srem(&mut self, key: &str, member: &[u8]) -> StoreResult<bool>;

    /// Members in unspecified order.
    fn smembers(&mut self, key: &str) -> StoreResult<Vec<Vec<u8>>>;

    /// Returns whether the field was newly created.
    fn hset(&mut self, key: &str, field: &str, value: &[u8]) -> StoreResult<bool>;

    fn hget(&mut self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Returns whether the field was present.
    fn hdel(&mut self, key: &str, field: &str) -> StoreResult<bool>;

    fn hgetall(&mut self, key: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;

    /// Append to a list, creating it on first push. Returns the new length.
    fn rpush(&mut self, key: &str, value: &[u8]) -> StoreResult<i64>;

    /// Pop the head of a list, blocking up to `timeout` for one to appear.
    /// `None` on timeout.
    fn blpop(&mut self, key: &str, timeout: Duration) -> StoreResult<Option<Vec<u8>>>;

    /// Arm optimistic concurrency for the given keys, accumulating with any
    /// keys already watched.
    fn watch(&mut self, keys: &[String]) -> StoreResult<()>;

    /// Drop all watched keys without executing anything.
    fn unwatch(&mut self) -> StoreResult<()>;

    /// Apply a batch atomically.
    ///
    /// With no keys watched the batch always commits and every command gets
    /// a reply slot. With keys watched, the batch commits only if none of
    /// them changed since [`watch`]; otherwise nothing applies and `None`
    /// comes back with the same keys re-armed against the current state, so
    /// a caller can re-read and retry without re-watching.
    ///
    /// A successful exec clears the watch set.
    ///
    /// [`watch`]: StoreConnection::watch
    fn exec(&mut self, batch: CommandBatch) -> StoreResult<Option<Vec<Reply>>>;
}

/// Factory for store connections.
///
/// Implementations are cheap to clone and share; each clone hands out
/// connections against the same keyspace.
pub trait StoreClient: Clone + Send + Sync + 'static {
    type Conn: StoreConnection + 'static;

    fn connect(&self) -> StoreResult<Self::Conn>;
}
