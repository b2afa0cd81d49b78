//! Cache entry envelope: plain payloads and versioned entries.
//!
//! Every value stored by the cache is wrapped in a [`CacheEntry`] before
//! encoding. Plain entries carry payload bytes only; versioned entries add
//! an optional version and a lock count, and participate in the optimistic
//! put protocol: a write lands only when the candidate version outranks the
//! stored one per a caller-supplied comparator. A rejected write is a
//! silent no-op, never a delete.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// VERSION VALUES
// ============================================================================

/// A comparable version attached to a versioned cache entry.
///
/// Hosts version their entities with counters or textual stamps; both are
/// representable here and survive the byte codec. Cross-kind comparisons
/// order by kind first (integers before text) so every pair of versions has
/// a deterministic answer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Version {
    /// Numeric version counter.
    Int(i64),
    /// Textual version stamp.
    Text(String),
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Int(n) => write!(f, "{}", n),
            Version::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Version {
    fn from(n: i64) -> Self {
        Version::Int(n)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Version::Text(s.to_string())
    }
}

/// Caller-supplied ordering over versions.
///
/// `compare(current, candidate)` returning [`Ordering::Less`] means the
/// candidate outranks the stored version and the write may proceed.
pub trait VersionComparator: Send + Sync {
    fn compare(&self, current: &Version, candidate: &Version) -> Ordering;
}

/// The default comparator: the derived ordering of [`Version`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalOrder;

impl VersionComparator for NaturalOrder {
    fn compare(&self, current: &Version, candidate: &Version) -> Ordering {
        current.cmp(candidate)
    }
}

// ============================================================================
// VERSIONED ENTRY
// ============================================================================

/// Payload plus version bookkeeping for optimistic puts.
///
/// Created on the first successful versioned put for a key and mutated in
/// place by later puts that pass the version check. An entry with no
/// version yet is a fresh placeholder and admits any candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedEntry {
    /// Encoded caller value.
    pub payload: Vec<u8>,
    /// Version under which the payload was written; `None` admits any write.
    pub version: Option<Version>,
    /// Host lock bookkeeping; preserved across updates.
    pub lock_count: u32,
}

impl VersionedEntry {
    /// Create a fresh entry for a first write.
    pub fn new(payload: Vec<u8>, version: Version) -> Self {
        Self {
            payload,
            version: Some(version),
            lock_count: 0,
        }
    }

    /// Whether `candidate` outranks the stored version per `comparator`.
    ///
    /// An absent stored version is always outranked. Equal versions are
    /// not: the ordering is strict, so replaying a write is a no-op.
    pub fn is_outranked_by(&self, candidate: &Version, comparator: &dyn VersionComparator) -> bool {
        match &self.version {
            None => true,
            Some(current) => comparator.compare(current, candidate) == Ordering::Less,
        }
    }

    /// Replace payload and version, keeping the lock count.
    pub fn update(&mut self, payload: Vec<u8>, version: Version) {
        self.payload = payload;
        self.version = Some(version);
    }
}

// ============================================================================
// ENTRY ENVELOPE
// ============================================================================

/// The tagged envelope written to the backing store.
///
/// Plain and versioned entries share one keyspace; which variant a reader
/// expects depends on context. The plain read path accepts either and
/// yields the payload; the versioned put path requires `Versioned` and
/// treats anything else as corruption (surfaced by the cache layer, never
/// coerced).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheEntry {
    /// Payload bytes with no version bookkeeping.
    Plain(Vec<u8>),
    /// Payload guarded by the optimistic put protocol.
    Versioned(VersionedEntry),
}

impl CacheEntry {
    /// The payload regardless of variant.
    pub fn into_payload(self) -> Vec<u8> {
        match self {
            CacheEntry::Plain(payload) => payload,
            CacheEntry::Versioned(entry) => entry.payload,
        }
    }

    /// Borrow the payload regardless of variant.
    pub fn payload(&self) -> &[u8] {
        match self {
            CacheEntry::Plain(payload) => payload,
            CacheEntry::Versioned(entry) => &entry.payload,
        }
    }

    /// The versioned entry, if this is one.
    pub fn into_versioned(self) -> Option<VersionedEntry> {
        match self {
            CacheEntry::Versioned(entry) => Some(entry),
            CacheEntry::Plain(_) => None,
        }
    }
}
