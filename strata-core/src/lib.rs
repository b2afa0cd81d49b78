//! Strata Core - Entry Envelope and Configuration Types
//!
//! Pure data types shared by the store and cache crates: the tagged
//! cache-entry envelope, version values and their comparator, the byte
//! codec abstraction, configuration surfaces, and the monotonic
//! timestamper. No I/O lives here.

pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod timestamp;

pub use codec::{BincodeCodec, Codec, JsonCodec};
pub use config::{ProviderSettings, RegionOptions, RegionStrategy};
pub use entry::{CacheEntry, NaturalOrder, Version, VersionComparator, VersionedEntry};
pub use error::{CodecError, ConfigError};
pub use timestamp::Timestamper;
