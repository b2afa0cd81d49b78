//! Background reclamation of cleared generations.
//!
//! Clearing a region retires its key set under a new name and pushes
//! that name onto a shared queue. The collector is a single worker
//! thread that blocks on the queue, reads each retired set, and expires
//! every key it names, then the set itself. Reclamation is pure cleanup;
//! correctness never depends on it because retired keys are already
//! unreachable.
//!
//! The collector is shared by every region a provider hands out, so its
//! lifecycle is reference counted: each `start` must be paired with a
//! `stop`, and the worker runs while any starter remains.

use crate::error::{CacheError, CacheResult};
use crate::namespace::GARBAGE_QUEUE_KEY;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use strata_store::{StoreClient, StoreConnection};
use tracing::{debug, warn};

/// How long one blocking pop waits before re-checking the stop flag.
const POP_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================================================
// Metrics
// ============================================================================

/// Counters the worker thread bumps as it reclaims.
#[derive(Debug, Default)]
pub struct GcMetrics {
    sets_drained: AtomicU64,
    keys_expired: AtomicU64,
    pop_failures: AtomicU64,
}

impl GcMetrics {
    pub fn snapshot(&self) -> GcMetricsSnapshot {
        GcMetricsSnapshot {
            sets_drained: self.sets_drained.load(Ordering::SeqCst),
            keys_expired: self.keys_expired.load(Ordering::SeqCst),
            pop_failures: self.pop_failures.load(Ordering::SeqCst),
        }
    }
}

/// A point-in-time copy of the collector's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcMetricsSnapshot {
    /// Retired key sets fully processed.
    pub sets_drained: u64,
    /// Individual keys expired out of retired sets.
    pub keys_expired: u64,
    /// Queue pops that failed at the store.
    pub pop_failures: u64,
}

// ============================================================================
// Collector
// ============================================================================

struct GcState {
    ref_count: usize,
    worker: Option<JoinHandle<()>>,
}

/// The reclamation worker and its lifecycle bookkeeping.
pub struct GarbageCollector<S: StoreClient> {
    client: S,
    state: Mutex<GcState>,
    stop: Arc<AtomicBool>,
    metrics: Arc<GcMetrics>,
}

impl<S: StoreClient> GarbageCollector<S> {
    pub fn new(client: S) -> Self {
        GarbageCollector {
            client,
            state: Mutex::new(GcState {
                ref_count: 0,
                worker: None,
            }),
            stop: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(GcMetrics::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, GcState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a user of the collector, spawning the worker on the
    /// first registration. The connection is established here so a
    /// broken store surfaces to the caller instead of dying in the
    /// worker.
    pub fn start(&self) -> CacheResult<()> {
        let mut state = self.state();
        if state.worker.is_none() {
            self.stop.store(false, Ordering::SeqCst);
            let conn =
                self.client
                    .connect()
                    .map_err(|source| CacheError::CollectorUnavailable {
                        reason: source.to_string(),
                    })?;
            let stop = Arc::clone(&self.stop);
            let metrics = Arc::clone(&self.metrics);
            let worker = thread::Builder::new()
                .name("strata-gc".to_string())
                .spawn(move || run(conn, stop, metrics))
                .map_err(|source| CacheError::CollectorUnavailable {
                    reason: source.to_string(),
                })?;
            state.worker = Some(worker);
            debug!("collector started");
        }
        state.ref_count += 1;
        Ok(())
    }

    /// Deregister a user. When the last one leaves, the worker is told
    /// to stop and joined before this returns.
    pub fn stop(&self) -> CacheResult<()> {
        let worker = {
            let mut state = self.state();
            if state.ref_count == 0 {
                return Ok(());
            }
            state.ref_count -= 1;
            if state.ref_count > 0 {
                return Ok(());
            }
            self.stop.store(true, Ordering::SeqCst);
            state.worker.take()
        };
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("collector thread panicked before joining");
            }
            debug!("collector stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state().worker.is_some()
    }

    pub fn metrics(&self) -> GcMetricsSnapshot {
        self.metrics.snapshot()
    }
}

fn run<Conn: StoreConnection>(mut conn: Conn, stop: Arc<AtomicBool>, metrics: Arc<GcMetrics>) {
    while !stop.load(Ordering::SeqCst) {
        match conn.blpop(GARBAGE_QUEUE_KEY, POP_TIMEOUT) {
            Ok(Some(name)) => match String::from_utf8(name) {
                Ok(retired) => drain(&mut conn, &retired, &metrics),
                Err(_) => warn!("discarding retired-set name that is not text"),
            },
            Ok(None) => {}
            Err(error) => {
                metrics.pop_failures.fetch_add(1, Ordering::SeqCst);
                warn!(%error, "collector could not pop; backing off");
                thread::sleep(POP_TIMEOUT);
            }
        }
    }
}

/// Expire every key a retired set names, then the set itself. Failures
/// are logged and skipped; whatever survives stays queued in the store's
/// own expiry, not ours.
fn drain<Conn: StoreConnection>(conn: &mut Conn, retired: &str, metrics: &GcMetrics) {
    let members = match conn.smembers(retired) {
        Ok(members) => members,
        Err(error) => {
            warn!(%error, retired, "could not read retired set");
            return;
        }
    };
    let mut expired = 0u64;
    for member in members {
        match String::from_utf8(member) {
            Ok(key) => match conn.expire(&key, Duration::ZERO) {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(error) => warn!(%error, key, "could not expire retired key"),
            },
            Err(_) => warn!(retired, "skipping retired key that is not text"),
        }
    }
    if let Err(error) = conn.expire(retired, Duration::ZERO) {
        warn!(%error, retired, "could not drop retired set");
    }
    metrics.sets_drained.fetch_add(1, Ordering::SeqCst);
    metrics.keys_expired.fetch_add(expired, Ordering::SeqCst);
    debug!(retired, keys = expired, "drained retired set");
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_store::MemoryStore;

    fn seed_retired_set(store: &MemoryStore, retired: &str, keys: &[&str]) {
        let mut conn = store.connect().unwrap();
        for key in keys {
            conn.set(key, b"stale").unwrap();
            conn.sadd(retired, key.as_bytes()).unwrap();
        }
        conn.rpush(GARBAGE_QUEUE_KEY, retired.as_bytes()).unwrap();
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_drains_queued_set() {
        let store = MemoryStore::new();
        seed_retired_set(&store, "retired_?r_keys_0", &["k1", "k2"]);

        let collector = GarbageCollector::new(store.clone());
        collector.start().unwrap();
        let mut conn = store.connect().unwrap();
        assert!(wait_until(|| {
            conn.get("k1").unwrap().is_none() && conn.get("k2").unwrap().is_none()
        }));
        // The set itself went too.
        assert!(wait_until(|| {
            conn.smembers("retired_?r_keys_0").unwrap().is_empty()
        }));
        collector.stop().unwrap();

        let metrics = collector.metrics();
        assert_eq!(metrics.sets_drained, 1);
        assert_eq!(metrics.keys_expired, 2);
        assert_eq!(metrics.pop_failures, 0);
    }

    #[test]
    fn test_reference_counted_lifecycle() {
        let store = MemoryStore::new();
        let collector = GarbageCollector::new(store);
        assert!(!collector.is_running());

        collector.start().unwrap();
        collector.start().unwrap();
        assert!(collector.is_running());

        collector.stop().unwrap();
        assert!(collector.is_running());
        collector.stop().unwrap();
        assert!(!collector.is_running());

        // A stop with no matching start is a quiet no-op.
        collector.stop().unwrap();
        assert!(!collector.is_running());
    }

    #[test]
    fn test_restart_after_full_stop() {
        let store = MemoryStore::new();
        let collector = GarbageCollector::new(store.clone());
        collector.start().unwrap();
        collector.stop().unwrap();

        seed_retired_set(&store, "retired_?r_keys_1", &["k3"]);
        collector.start().unwrap();
        let mut conn = store.connect().unwrap();
        assert!(wait_until(|| conn.get("k3").unwrap().is_none()));
        collector.stop().unwrap();
    }

    #[test]
    fn test_missing_set_is_not_fatal() {
        let store = MemoryStore::new();
        let mut conn = store.connect().unwrap();
        conn.rpush(GARBAGE_QUEUE_KEY, b"retired_?ghost_keys_0")
            .unwrap();
        conn.set("live", b"v").unwrap();

        let collector = GarbageCollector::new(store.clone());
        collector.start().unwrap();
        // The empty name drains to nothing and the worker keeps going.
        assert!(wait_until(|| collector.metrics().sets_drained >= 1));
        collector.stop().unwrap();
        assert_eq!(conn.get("live").unwrap(), Some(b"v".to_vec()));
        assert_eq!(collector.metrics().keys_expired, 0);
    }
}
