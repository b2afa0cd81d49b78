//! The non-clearable region flavor.
//!
//! The generation is pinned at zero forever, so no operation spends a
//! round trip proving it and no key-set bookkeeping is kept. In
//! exchange, `clear()` and `destroy()` are refused outright. Suited to
//! regions whose entries only ever expire or get removed one by one.

use crate::error::{CacheError, CacheResult};
use crate::region::{
    abandon_watch, CacheRegion, HashCache, RegionCore, VersionedCache, VersionedPut,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use strata_core::{BincodeCodec, CacheEntry, Codec, VersionComparator, VersionedEntry};
use strata_store::{CommandBatch, StoreClient, StoreConnection};
use tracing::{debug, error};

/// The generation every key of a pinned region lives under.
const PINNED_GENERATION: i64 = 0;

/// A cache region that trades `clear()` away for leaner traffic.
pub struct PinnedRegion<S: StoreClient, C: Codec = BincodeCodec> {
    core: RegionCore<S, C>,
}

impl<S: StoreClient, C: Codec> PinnedRegion<S, C> {
    pub(crate) fn open(core: RegionCore<S, C>) -> Self {
        debug!(region = core.name(), "opened pinned region");
        PinnedRegion { core }
    }

    fn global_key(&self, key: &str) -> String {
        self.core.namespace().global_key(PINNED_GENERATION, key)
    }

    fn encode_plain(&self, payload: &[u8]) -> CacheResult<Vec<u8>> {
        Ok(self
            .core
            .codec()
            .encode(&CacheEntry::Plain(payload.to_vec()))?)
    }

    fn decode_entry(&self, key: &str, bytes: &[u8]) -> CacheResult<CacheEntry> {
        self.core.codec().decode(bytes).map_err(|source| {
            error!(region = self.core.name(), key, %source, "undecodable cache entry");
            CacheError::CorruptEntry {
                key: key.to_string(),
                detail: source.to_string(),
            }
        })
    }

    /// Store a value through the region's codec.
    pub fn put_value<T: Serialize>(&self, key: &str, value: &T) -> CacheResult<()> {
        let payload = self.core.codec().encode(value)?;
        self.put(key, &payload)
    }

    /// Fetch a value through the region's codec.
    pub fn get_value<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.get(key)? {
            Some(payload) => Ok(Some(self.core.codec().decode(&payload)?)),
            None => Ok(None),
        }
    }
}

impl<S: StoreClient, C: Codec> CacheRegion for PinnedRegion<S, C> {
    fn region_name(&self) -> &str {
        self.core.name()
    }

    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        if key.is_empty() {
            return Ok(None);
        }
        debug!(region = self.core.name(), key, "fetching entry");
        let global = self.global_key(key);
        let fetched = self
            .core
            .pool()
            .with(|conn| Ok::<_, CacheError>(conn.get(&global)?))?;
        match fetched {
            Some(bytes) => Ok(Some(self.decode_entry(key, &bytes)?.into_payload())),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        RegionCore::<S, C>::require_key(key)?;
        RegionCore::<S, C>::require_value(value)?;
        debug!(region = self.core.name(), key, "caching entry");
        let encoded = self.encode_plain(value)?;
        let global = self.global_key(key);
        let expiration = self.core.options().expiration;
        self.core
            .pool()
            .with(|conn| Ok::<_, CacheError>(conn.set_ex(&global, &encoded, expiration)?))
    }

    fn remove(&self, key: &str) -> CacheResult<()> {
        RegionCore::<S, C>::require_key(key)?;
        debug!(region = self.core.name(), key, "removing entry");
        let global = self.global_key(key);
        self.core.pool().with(|conn| {
            conn.del(&global)?;
            Ok::<_, CacheError>(())
        })
    }

    fn clear(&self) -> CacheResult<()> {
        Err(CacheError::ClearUnsupported {
            region: self.core.name().to_string(),
        })
    }

    fn lock(&self, key: &str) -> CacheResult<bool> {
        let lock_key = self
            .core
            .namespace()
            .global_lock_key(PINNED_GENERATION, key);
        self.core.acquire_lock(key, lock_key)
    }

    fn unlock(&self, key: &str) -> CacheResult<bool> {
        self.core.release_lock(key)
    }

    fn multi_get(&self, keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        debug!(
            region = self.core.name(),
            keys = keys.len(),
            "fetching entries"
        );
        let globals: Vec<String> = keys.iter().map(|key| self.global_key(key)).collect();
        let slots = self
            .core
            .pool()
            .with(|conn| Ok::<_, CacheError>(conn.mget(&globals)?))?;
        let mut found = HashMap::new();
        for (key, slot) in keys.iter().zip(slots) {
            if let Some(bytes) = slot {
                let entry = self.decode_entry(key, &bytes)?;
                found.insert(key.clone(), entry.into_payload());
            }
        }
        Ok(found)
    }
}

impl<S: StoreClient, C: Codec> VersionedCache for PinnedRegion<S, C> {
    fn put_versioned(
        &self,
        puts: &[VersionedPut],
        comparator: &dyn VersionComparator,
    ) -> CacheResult<usize> {
        let work: Vec<&VersionedPut> = puts.iter().filter(|put| !put.key.is_empty()).collect();
        if work.is_empty() {
            return Ok(0);
        }
        debug!(
            region = self.core.name(),
            candidates = work.len(),
            "versioned put"
        );
        let globals: Vec<String> = work.iter().map(|put| self.global_key(&put.key)).collect();
        let expiration = self.core.options().expiration;
        self.core.pool().with(|conn| {
            // With no generation to race, only the entries themselves
            // are watched; an aborted commit replays the judgment on the
            // re-armed session.
            conn.watch(&globals)?;
            for _ in 0..=self.core.options().retry_ceiling {
                let slots = match conn.mget(&globals) {
                    Ok(slots) => slots,
                    Err(e) => return Err(abandon_watch(conn, e.into())),
                };

                let mut writes: Vec<(&String, Vec<u8>)> = Vec::new();
                for ((put, global), slot) in work.iter().zip(globals.iter()).zip(slots.iter()) {
                    let next = match slot {
                        None => VersionedEntry::new(put.payload.clone(), put.version.clone()),
                        Some(bytes) => match self.decode_entry(&put.key, bytes) {
                            Ok(CacheEntry::Versioned(mut entry)) => {
                                if !entry.is_outranked_by(&put.version, comparator) {
                                    continue;
                                }
                                entry.update(put.payload.clone(), put.version.clone());
                                entry
                            }
                            Ok(CacheEntry::Plain(_)) => {
                                error!(
                                    region = self.core.name(),
                                    key = put.key,
                                    "plain entry where a versioned entry was required"
                                );
                                let err = CacheError::CorruptEntry {
                                    key: put.key.clone(),
                                    detail: "plain entry where a versioned entry was required"
                                        .to_string(),
                                };
                                return Err(abandon_watch(conn, err));
                            }
                            Err(e) => return Err(abandon_watch(conn, e)),
                        },
                    };
                    let encoded = match self.core.codec().encode(&CacheEntry::Versioned(next)) {
                        Ok(encoded) => encoded,
                        Err(e) => return Err(abandon_watch(conn, e.into())),
                    };
                    writes.push((global, encoded));
                }

                if writes.is_empty() {
                    conn.unwatch()?;
                    return Ok(0);
                }

                let mut batch = CommandBatch::new();
                for (global, encoded) in &writes {
                    batch.set_ex(global, encoded, expiration);
                }
                match conn.exec(batch) {
                    Ok(Some(_)) => return Ok(writes.len()),
                    Ok(None) => {
                        debug!(region = self.core.name(), "versioned put aborted; replaying");
                    }
                    Err(e) => return Err(abandon_watch(conn, e.into())),
                }
            }
            conn.unwatch()?;
            Err(CacheError::RetryExhausted {
                attempts: self.core.options().retry_ceiling + 1,
            })
        })
    }
}

impl<S: StoreClient, C: Codec> HashCache for PinnedRegion<S, C> {
    fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> CacheResult<bool> {
        RegionCore::<S, C>::require_key(key)?;
        if field.is_empty() {
            return Err(CacheError::InvalidArgument { what: "field" });
        }
        RegionCore::<S, C>::require_value(value)?;
        debug!(region = self.core.name(), key, field, "caching field");
        let encoded = self.encode_plain(value)?;
        let container = self
            .core
            .namespace()
            .global_hash_key(PINNED_GENERATION, key);
        self.core
            .pool()
            .with(|conn| Ok::<_, CacheError>(conn.hset(&container, field, &encoded)?))
    }

    fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<Vec<u8>>> {
        if key.is_empty() || field.is_empty() {
            return Ok(None);
        }
        debug!(region = self.core.name(), key, field, "fetching field");
        let container = self
            .core
            .namespace()
            .global_hash_key(PINNED_GENERATION, key);
        let fetched = self
            .core
            .pool()
            .with(|conn| Ok::<_, CacheError>(conn.hget(&container, field)?))?;
        match fetched {
            Some(bytes) => Ok(Some(self.decode_entry(key, &bytes)?.into_payload())),
            None => Ok(None),
        }
    }

    fn hash_remove(&self, key: &str, field: &str) -> CacheResult<bool> {
        RegionCore::<S, C>::require_key(key)?;
        if field.is_empty() {
            return Err(CacheError::InvalidArgument { what: "field" });
        }
        debug!(region = self.core.name(), key, field, "removing field");
        let container = self
            .core
            .namespace()
            .global_hash_key(PINNED_GENERATION, key);
        self.core
            .pool()
            .with(|conn| Ok::<_, CacheError>(conn.hdel(&container, field)?))
    }

    fn hash_entries(&self, key: &str) -> CacheResult<Vec<(String, Vec<u8>)>> {
        if key.is_empty() {
            return Ok(Vec::new());
        }
        debug!(region = self.core.name(), key, "fetching all fields");
        let container = self
            .core
            .namespace()
            .global_hash_key(PINNED_GENERATION, key);
        let pairs = self
            .core
            .pool()
            .with(|conn| Ok::<_, CacheError>(conn.hgetall(&container)?))?;
        let mut entries = Vec::with_capacity(pairs.len());
        for (field, bytes) in pairs {
            let payload = self.decode_entry(key, &bytes)?.into_payload();
            entries.push((field, payload));
        }
        Ok(entries)
    }
}
