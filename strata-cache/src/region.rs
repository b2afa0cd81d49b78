//! Host-facing cache surfaces and the plumbing shared by every region.
//!
//! [`CacheRegion`] is the object-safe contract hosts program against:
//! byte-oriented get/put/remove, region-wide clear, and named locks.
//! [`VersionedCache`] and [`HashCache`] are optional extensions for
//! regions that support optimistic concurrent puts and field-grained
//! entries. Concrete regions implement these over a [`RegionCore`],
//! which owns the key namespace, connection pool, codec, and the table
//! of locks this process currently holds.

use crate::error::{CacheError, CacheResult};
use crate::lock::{self, LockToken};
use crate::namespace::RegionNamespace;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use strata_core::{Codec, RegionOptions, Timestamper, Version, VersionComparator};
use strata_store::{
    CommandBatch, ConnectionPool, Reply, StoreClient, StoreConnection, StoreError,
};

/// Disarm the connection's watch session on the way out to an error, so
/// the pooled connection carries no stale session state. The connection
/// is already surfacing `err`; a second failure here has nothing to add.
pub(crate) fn abandon_watch<Conn: StoreConnection>(conn: &mut Conn, err: CacheError) -> CacheError {
    let _ = conn.unwatch();
    err
}

// ============================================================================
// Host-Facing Traits
// ============================================================================

/// A named slice of the cache with its own lifetime and locks.
///
/// All operations are safe to call from multiple threads. Keys and
/// values are opaque bytes; encoding is the caller's business at this
/// level (see the typed helpers on the concrete region types).
pub trait CacheRegion: Send + Sync {
    /// The name this region was created under.
    fn region_name(&self) -> &str;

    /// Fetch one entry. Absent, expired, and cleared entries all come
    /// back as `None`; so does an empty key.
    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store one entry under the region's configured expiration.
    /// Empty keys and empty values are rejected as invalid arguments.
    fn put(&self, key: &str, value: &[u8]) -> CacheResult<()>;

    /// Delete one entry. Deleting an absent key is not an error.
    fn remove(&self, key: &str) -> CacheResult<()>;

    /// Invalidate every entry in the region at once. Readers observe the
    /// flip atomically; reclamation of the old entries happens later.
    fn clear(&self) -> CacheResult<()>;

    /// Tear the region down. Indistinguishable from [`clear`] at the
    /// store level; the handle itself stays usable.
    ///
    /// [`clear`]: CacheRegion::clear
    fn destroy(&self) -> CacheResult<()> {
        self.clear()
    }

    /// Take the named lock, waiting up to the region's acquisition
    /// timeout. Returns false when patience runs out while another
    /// holder is live. Taking a lock this handle already holds is a
    /// [`CacheError::LockHeld`] error.
    fn lock(&self, key: &str) -> CacheResult<bool>;

    /// Release the named lock. Returns false when this handle does not
    /// hold it, or held it so long the lease lapsed and someone else
    /// claimed it.
    fn unlock(&self, key: &str) -> CacheResult<bool>;

    /// Fetch many entries in one store round trip. The result maps each
    /// found key to its payload; misses are simply not present.
    fn multi_get(&self, keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>>;

    /// A process-wide monotonic timestamp for host-side bookkeeping.
    fn next_timestamp(&self) -> i64 {
        Timestamper::global().next()
    }
}

/// One key's worth of a versioned batch put.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedPut {
    pub key: String,
    pub payload: Vec<u8>,
    pub version: Version,
}

impl VersionedPut {
    pub fn new(key: impl Into<String>, payload: Vec<u8>, version: Version) -> Self {
        VersionedPut {
            key: key.into(),
            payload,
            version,
        }
    }
}

/// Optimistic concurrent puts for regions that keep version envelopes.
pub trait VersionedCache: CacheRegion {
    /// Write each entry only if it outranks what the store currently
    /// holds under `comparator`. The whole batch commits against one
    /// consistent snapshot; when any watched key moves underneath, the
    /// decision is replayed against fresh state. Returns how many
    /// entries were actually written. Entries with empty keys are
    /// skipped.
    fn put_versioned(
        &self,
        puts: &[VersionedPut],
        comparator: &dyn VersionComparator,
    ) -> CacheResult<usize>;
}

/// Field-grained entries living in one store-side container per key.
pub trait HashCache: CacheRegion {
    /// Set one field. Returns true when the field was newly created.
    fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> CacheResult<bool>;

    /// Fetch one field, `None` when the container or field is absent.
    fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Delete one field. Returns true when the field existed.
    fn hash_remove(&self, key: &str, field: &str) -> CacheResult<bool>;

    /// Every field of the container, sorted by field name.
    fn hash_entries(&self, key: &str) -> CacheResult<Vec<(String, Vec<u8>)>>;
}

// ============================================================================
// Shared Region Internals
// ============================================================================

/// A lock this process holds: the physical key it lives under and the
/// token that proves ownership. The physical key is captured at acquire
/// time so release still finds it after the region's keyspace moves on.
#[derive(Debug, Clone)]
struct HeldLock {
    lock_key: String,
    token: LockToken,
}

/// State common to every region flavor: identity, key construction,
/// store access, payload codec, and the held-lock table.
pub(crate) struct RegionCore<S: StoreClient, C: Codec> {
    name: String,
    namespace: RegionNamespace,
    pool: Arc<ConnectionPool<S>>,
    codec: C,
    options: RegionOptions,
    held_locks: Mutex<HashMap<String, HeldLock>>,
}

impl<S: StoreClient, C: Codec> RegionCore<S, C> {
    pub(crate) fn new(
        name: impl Into<String>,
        namespace: RegionNamespace,
        pool: Arc<ConnectionPool<S>>,
        codec: C,
        options: RegionOptions,
    ) -> Self {
        RegionCore {
            name: name.into(),
            namespace,
            pool,
            codec,
            options,
            held_locks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn namespace(&self) -> &RegionNamespace {
        &self.namespace
    }

    pub(crate) fn pool(&self) -> &ConnectionPool<S> {
        &self.pool
    }

    pub(crate) fn codec(&self) -> &C {
        &self.codec
    }

    pub(crate) fn options(&self) -> &RegionOptions {
        &self.options
    }

    /// Reject empty keys on write paths.
    pub(crate) fn require_key(key: &str) -> CacheResult<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidArgument { what: "key" });
        }
        Ok(())
    }

    /// Reject empty values on write paths.
    pub(crate) fn require_value(value: &[u8]) -> CacheResult<()> {
        if value.is_empty() {
            return Err(CacheError::InvalidArgument { what: "value" });
        }
        Ok(())
    }

    /// Run a batch that carries no watch. Such a batch always commits,
    /// so an aborted reply can only mean the connection lost its session
    /// state in transit.
    pub(crate) fn run_batch(
        conn: &mut <S as StoreClient>::Conn,
        batch: CommandBatch,
    ) -> CacheResult<Vec<Reply>> {
        match conn.exec(batch)? {
            Some(replies) => Ok(replies),
            None => Err(CacheError::Store {
                source: StoreError::Transport {
                    reason: "batch without a watch did not commit".to_string(),
                },
            }),
        }
    }

    // ------------------------------------------------------------------
    // Lock bookkeeping
    // ------------------------------------------------------------------

    fn held_locks(&self) -> std::sync::MutexGuard<'_, HashMap<String, HeldLock>> {
        self.held_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the lock living under `lock_key`, tracking it under the
    /// caller's key. One holder per caller key per region handle.
    pub(crate) fn acquire_lock(&self, key: &str, lock_key: String) -> CacheResult<bool> {
        Self::require_key(key)?;
        if self.held_locks().contains_key(key) {
            return Err(CacheError::LockHeld {
                key: key.to_string(),
            });
        }
        let granted = self.pool.with(|conn| {
            lock::acquire(
                conn,
                &lock_key,
                self.options.lock_acquisition_timeout,
                self.options.lock_timeout,
            )
        })?;
        match granted {
            Some(token) => {
                self.held_locks()
                    .insert(key.to_string(), HeldLock { lock_key, token });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Release the lock tracked under the caller's key, if any. The
    /// table entry survives a transport failure so the caller can try
    /// again; it is dropped once the store has answered either way.
    pub(crate) fn release_lock(&self, key: &str) -> CacheResult<bool> {
        Self::require_key(key)?;
        let tracked = match self.held_locks().get(key) {
            Some(held) => held.clone(),
            None => return Ok(false),
        };
        let released = self
            .pool
            .with(|conn| lock::release(conn, &tracked.lock_key, tracked.token))?;
        self.held_locks().remove(key);
        Ok(released)
    }
}
