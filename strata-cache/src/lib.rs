//! Strata Cache - Region-Based Cache Client
//!
//! A distributed cache client over a single logical key-value backend.
//! The keyspace is carved into named regions, each independently
//! clearable in O(1) through a generation counter embedded in every
//! physical key. On top of the plain byte-oriented surface sit
//! optimistic versioned puts, field-grained hash entries, and
//! store-backed named locks that survive crashed holders. A shared
//! background collector reclaims the keys each cleared generation
//! leaves behind.
//!
//! [`CacheProvider`] is the way in: it owns the connection pool and the
//! collector, and stamps out region handles.

pub mod error;
pub mod gc;
pub mod generational;
mod lock;
pub mod namespace;
pub mod pinned;
pub mod provider;
pub mod region;

pub use error::{CacheError, CacheResult};
pub use gc::{GarbageCollector, GcMetrics, GcMetricsSnapshot};
pub use generational::GenerationalRegion;
pub use namespace::{sanitize, RegionNamespace, GARBAGE_QUEUE_KEY};
pub use pinned::PinnedRegion;
pub use provider::CacheProvider;
pub use region::{CacheRegion, HashCache, VersionedCache, VersionedPut};

// Re-export the entry and configuration types hosts touch directly.
pub use strata_core::{
    BincodeCodec, CacheEntry, Codec, JsonCodec, NaturalOrder, ProviderSettings, RegionOptions,
    RegionStrategy, Version, VersionComparator, VersionedEntry,
};
