//! Monotonic timestamp generation.
//!
//! Hosts ask the cache for a strictly increasing counter to order cache
//! transactions across threads. Values are wall-clock milliseconds shifted
//! left with a per-millisecond sequence in the low bits, so they sort by
//! time yet never repeat within a process even under burst allocation.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Low bits reserved for the per-millisecond sequence.
const SEQUENCE_BITS: u32 = 12;

/// Strictly increasing timestamp source.
#[derive(Debug)]
pub struct Timestamper {
    last: AtomicI64,
}

impl Timestamper {
    pub const fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }

    /// The process-wide instance shared by all providers and regions.
    pub fn global() -> &'static Timestamper {
        static GLOBAL: Timestamper = Timestamper::new();
        &GLOBAL
    }

    /// Next timestamp, strictly greater than every previous return value.
    ///
    /// When more than 2^12 values are drawn within one millisecond the
    /// counter runs ahead of the wall clock; it realigns on the next quiet
    /// millisecond.
    pub fn next(&self) -> i64 {
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let wall = Utc::now().timestamp_millis() << SEQUENCE_BITS;
            let candidate = if wall > prev { wall } else { prev + 1 };
            match self
                .last
                .compare_exchange(prev, candidate, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

impl Default for Timestamper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_strictly_increasing() {
        let ts = Timestamper::new();
        let mut prev = ts.next();
        for _ in 0..10_000 {
            let next = ts.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_tracks_wall_clock() {
        let ts = Timestamper::new();
        let millis = ts.next() >> SEQUENCE_BITS;
        let now = Utc::now().timestamp_millis();
        assert!((now - millis).abs() < 60_000);
    }

    #[test]
    fn test_unique_across_threads() {
        let ts = Arc::new(Timestamper::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let ts = Arc::clone(&ts);
            handles.push(thread::spawn(move || {
                (0..1_000).map(|_| ts.next()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                assert!(seen.insert(value), "duplicate timestamp {}", value);
            }
        }
        assert_eq!(seen.len(), 4_000);
    }

    #[test]
    fn test_global_is_shared() {
        let a = Timestamper::global().next();
        let b = Timestamper::global().next();
        assert!(b > a);
    }
}
