//! The clearable region flavor.
//!
//! Every physical key embeds the region's generation counter, so
//! `clear()` is one increment: older entries become unreachable the
//! instant the counter moves, and a background collector reclaims them
//! later. The cost is that every operation must prove it used the live
//! generation. Reads fetch the counter in the same round trip as the
//! data; writes read it back inside their transaction. When the proof
//! fails the local copy of the counter is refreshed and the whole
//! operation replays, up to the region's retry ceiling.
//!
//! Versioned puts layer optimistic concurrency on top: the candidate
//! entries and the counter are watched, current state is read and
//! judged against the caller's comparator, and the surviving writes
//! commit only if nothing watched moved in between. An aborted commit
//! replays the judgment against fresh state without giving up the
//! watch session.

use crate::error::{CacheError, CacheResult};
use crate::region::{
    abandon_watch, CacheRegion, HashCache, RegionCore, VersionedCache, VersionedPut,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use strata_core::{BincodeCodec, CacheEntry, Codec, VersionComparator, VersionedEntry};
use strata_store::{CommandBatch, Reply, StoreClient, StoreConnection, StoreError};
use tracing::{debug, error};

/// Local generation value meaning "never synced with the store".
const UNSYNCED: i64 = -1;

fn short_reply() -> CacheError {
    CacheError::Store {
        source: StoreError::Transport {
            reason: "store returned fewer reply slots than requested".to_string(),
        },
    }
}

/// A clearable cache region backed by a generation counter.
///
/// Handles are cheap to share behind an `Arc` and safe to use from many
/// threads; the only local state beyond configuration is the cached
/// generation, which every operation keeps honest against the store.
pub struct GenerationalRegion<S: StoreClient, C: Codec = BincodeCodec> {
    core: RegionCore<S, C>,
    /// Last generation observed from the store, [`UNSYNCED`] until the
    /// first operation fetches it.
    generation: AtomicI64,
}

impl<S: StoreClient, C: Codec> GenerationalRegion<S, C> {
    pub(crate) fn open(core: RegionCore<S, C>) -> Self {
        debug!(region = core.name(), "opened region");
        GenerationalRegion {
            core,
            generation: AtomicI64::new(UNSYNCED),
        }
    }

    fn cached_generation(&self) -> i64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The generation to run the next attempt under, fetching it on
    /// first use. Incrementing by zero creates the counter at zero on
    /// first contact and reads it back without disturbing it afterwards,
    /// so every process opening the same region converges on one value.
    fn current_generation(&self, conn: &mut S::Conn) -> CacheResult<i64> {
        let cached = self.cached_generation();
        if cached != UNSYNCED {
            return Ok(cached);
        }
        let fetched = conn.incr_by(self.core.namespace().generation_key(), 0)?;
        self.note_generation(fetched);
        debug!(
            region = self.core.name(),
            generation = fetched,
            "synced generation"
        );
        Ok(self.cached_generation())
    }

    /// Adopt a generation observed from the store. The counter only ever
    /// grows there, so a late observation can never roll us back.
    fn note_generation(&self, observed: i64) {
        self.generation.fetch_max(observed, Ordering::SeqCst);
    }

    /// A generation value read as raw bytes. An absent counter is a
    /// region nobody has written yet, which reads as generation zero.
    fn parse_generation(raw: Option<&[u8]>, generation_key: &str) -> CacheResult<i64> {
        match raw {
            None => Ok(0),
            Some(bytes) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|text| text.trim().parse().ok())
                .ok_or_else(|| {
                    error!(key = generation_key, "generation counter is not an integer");
                    CacheError::CorruptEntry {
                        key: generation_key.to_string(),
                        detail: "generation counter is not an integer".to_string(),
                    }
                }),
        }
    }

    /// A generation value carried in a batch reply slot. `Get` produces
    /// bytes or nil, `IncrBy` produces an integer.
    fn reply_generation(slot: Option<&Reply>, generation_key: &str) -> CacheResult<i64> {
        match slot {
            Some(Reply::Nil) => Ok(0),
            Some(Reply::Bytes(raw)) => Self::parse_generation(Some(raw), generation_key),
            Some(Reply::Int(value)) => Ok(*value),
            Some(other) => Err(CacheError::CorruptEntry {
                key: generation_key.to_string(),
                detail: format!("unexpected generation reply: {:?}", other),
            }),
            None => Err(short_reply()),
        }
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

impl<S: StoreClient, C: Codec> CacheRegion for GenerationalRegion<S, C> {
    fn region_name(&self) -> &str {
        self.core.name()
    }

    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        if key.is_empty() {
            return Ok(None);
        }
        debug!(region = self.core.name(), key, "fetching entry");
        let found = self.multi_get(std::slice::from_ref(&key.to_string()))?;
        Ok(found.into_values().next())
    }

    fn put(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        RegionCore::<S, C>::require_key(key)?;
        RegionCore::<S, C>::require_value(value)?;
        debug!(region = self.core.name(), key, "caching entry");
        let encoded = self.encode_plain(value)?;
        let namespace = self.core.namespace();
        let expiration = self.core.options().expiration;
        self.core.pool().with(|conn| {
            for _ in 0..=self.core.options().retry_ceiling {
                let generation = self.current_generation(conn)?;
                let global = namespace.global_key(generation, key);
                let mut batch = CommandBatch::new();
                batch.get(namespace.generation_key());
                batch.set_ex(&global, &encoded, expiration);
                batch.sadd(namespace.keys_set_key(), global.as_bytes());
                let replies = RegionCore::<S, C>::run_batch(conn, batch)?;
                let current =
                    Self::reply_generation(replies.first(), namespace.generation_key())?;
                if current == generation {
                    return Ok(());
                }
                // The write landed under a retired generation, where no
                // reader will ever find it. Replay under the live one.
                self.note_generation(current);
            }
            Err(CacheError::RetryExhausted {
                attempts: self.core.options().retry_ceiling + 1,
            })
        })
    }

    fn remove(&self, key: &str) -> CacheResult<()> {
        RegionCore::<S, C>::require_key(key)?;
        debug!(region = self.core.name(), key, "removing entry");
        let namespace = self.core.namespace();
        self.core.pool().with(|conn| {
            for _ in 0..=self.core.options().retry_ceiling {
                let generation = self.current_generation(conn)?;
                let global = namespace.global_key(generation, key);
                let mut batch = CommandBatch::new();
                batch.get(namespace.generation_key());
                batch.del(&global);
                batch.srem(namespace.keys_set_key(), global.as_bytes());
                let replies = RegionCore::<S, C>::run_batch(conn, batch)?;
                let current =
                    Self::reply_generation(replies.first(), namespace.generation_key())?;
                if current == generation {
                    return Ok(());
                }
                self.note_generation(current);
            }
            Err(CacheError::RetryExhausted {
                attempts: self.core.options().retry_ceiling + 1,
            })
        })
    }

    fn clear(&self) -> CacheResult<()> {
        let namespace = self.core.namespace();
        self.core.pool().with(|conn| {
            // The retired set is named before the increment commits, so
            // it carries the generation this handle believed in. The
            // collector only needs the name to match the push below.
            let retired = namespace.retired_set_key(self.current_generation(conn)?);
            let mut batch = CommandBatch::new();
            batch.incr_by(namespace.generation_key(), 1);
            batch.rename(namespace.keys_set_key(), &retired);
            batch.rpush(crate::namespace::GARBAGE_QUEUE_KEY, retired.as_bytes());
            let replies = RegionCore::<S, C>::run_batch(conn, batch)?;
            let advanced = match replies.first() {
                Some(Reply::Int(value)) => *value,
                Some(other) => {
                    return Err(CacheError::CorruptEntry {
                        key: namespace.generation_key().to_string(),
                        detail: format!("generation counter did not increment: {:?}", other),
                    })
                }
                None => return Err(short_reply()),
            };
            if replies.get(1).map(Reply::is_failed).unwrap_or(false) {
                // Nothing was ever tracked for this region; the rename
                // had no source. The collector skips the empty name.
                debug!(region = self.core.name(), "cleared region with no tracked keys");
            }
            self.note_generation(advanced);
            debug!(
                region = self.core.name(),
                generation = advanced,
                "cleared region"
            );
            Ok(())
        })
    }

    fn lock(&self, key: &str) -> CacheResult<bool> {
        RegionCore::<S, C>::require_key(key)?;
        let generation = self
            .core
            .pool()
            .with(|conn| self.current_generation(conn))?;
        let lock_key = self.core.namespace().global_lock_key(generation, key);
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
        let namespace = self.core.namespace();
        self.core.pool().with(|conn| {
            for _ in 0..=self.core.options().retry_ceiling {
                let generation = self.current_generation(conn)?;
                let mut lookup = Vec::with_capacity(keys.len() + 1);
                lookup.push(namespace.generation_key().to_string());
                for key in keys {
                    lookup.push(namespace.global_key(generation, key));
                }
                let slots = conn.mget(&lookup)?;
                let (generation_slot, value_slots) = match slots.split_first() {
                    Some(split) => split,
                    None => return Err(short_reply()),
                };
                if value_slots.len() != keys.len() {
                    return Err(short_reply());
                }
                let current =
                    Self::parse_generation(generation_slot.as_deref(), namespace.generation_key())?;
                if current != generation {
                    self.note_generation(current);
                    continue;
                }
                let mut found = HashMap::new();
                for (key, slot) in keys.iter().zip(value_slots) {
                    if let Some(bytes) = slot {
                        let entry = self.decode_entry(key, bytes)?;
                        found.insert(key.clone(), entry.into_payload());
                    }
                }
                return Ok(found);
            }
            Err(CacheError::RetryExhausted {
                attempts: self.core.options().retry_ceiling + 1,
            })
        })
    }
}

impl<S: StoreClient, C: Codec> VersionedCache for GenerationalRegion<S, C> {
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
        let namespace = self.core.namespace();
        let expiration = self.core.options().expiration;
        self.core.pool().with(|conn| {
            let generation_key = namespace.generation_key().to_string();
            let mut armed = false;
            let mut generation = UNSYNCED;
            let mut globals: Vec<String> = Vec::new();
            for _ in 0..=self.core.options().retry_ceiling {
                if !armed {
                    generation = self.current_generation(conn)?;
                    globals = work
                        .iter()
                        .map(|put| namespace.global_key(generation, &put.key))
                        .collect();
                    let mut watched = globals.clone();
                    watched.push(generation_key.clone());
                    conn.watch(&watched)?;
                    armed = true;
                }

                let mut lookup = Vec::with_capacity(globals.len() + 1);
                lookup.push(generation_key.clone());
                lookup.extend(globals.iter().cloned());
                let slots = match conn.mget(&lookup) {
                    Ok(slots) => slots,
                    Err(e) => return Err(abandon_watch(conn, e.into())),
                };
                let (generation_slot, value_slots) = match slots.split_first() {
                    Some(split) => split,
                    None => return Err(abandon_watch(conn, short_reply())),
                };
                if value_slots.len() != work.len() {
                    return Err(abandon_watch(conn, short_reply()));
                }
                let current =
                    match Self::parse_generation(generation_slot.as_deref(), &generation_key) {
                        Ok(current) => current,
                        Err(e) => return Err(abandon_watch(conn, e)),
                    };
                if current != generation {
                    // The watched counter moved, so this commit cannot
                    // land anyway. Start over against the new keyspace.
                    self.note_generation(current);
                    conn.unwatch()?;
                    armed = false;
                    continue;
                }

                let mut writes: Vec<(&String, Vec<u8>)> = Vec::new();
                for ((put, global), slot) in
                    work.iter().zip(globals.iter()).zip(value_slots.iter())
                {
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
                    // Every candidate lost its version race; nothing to
                    // commit and nothing changed.
                    conn.unwatch()?;
                    return Ok(0);
                }

                let mut batch = CommandBatch::new();
                for (global, encoded) in &writes {
                    batch.set_ex(global, encoded, expiration);
                    batch.sadd(namespace.keys_set_key(), global.as_bytes());
                }
                match conn.exec(batch) {
                    Ok(Some(_)) => return Ok(writes.len()),
                    Ok(None) => {
                        // Aborted: something watched moved. The watch
                        // session is re-armed at current state, so replay
                        // the read and the judgment without rebuilding it.
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

impl<S: StoreClient, C: Codec> HashCache for GenerationalRegion<S, C> {
    fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> CacheResult<bool> {
        RegionCore::<S, C>::require_key(key)?;
        if field.is_empty() {
            return Err(CacheError::InvalidArgument { what: "field" });
        }
        RegionCore::<S, C>::require_value(value)?;
        debug!(region = self.core.name(), key, field, "caching field");
        let encoded = self.encode_plain(value)?;
        let namespace = self.core.namespace();
        self.core.pool().with(|conn| {
            for _ in 0..=self.core.options().retry_ceiling {
                let generation = self.current_generation(conn)?;
                let container = namespace.global_hash_key(generation, key);
                let mut batch = CommandBatch::new();
                batch.get(namespace.generation_key());
                batch.hset(&container, field, &encoded);
                batch.sadd(namespace.keys_set_key(), container.as_bytes());
                let replies = RegionCore::<S, C>::run_batch(conn, batch)?;
                let current =
                    Self::reply_generation(replies.first(), namespace.generation_key())?;
                if current == generation {
                    return match replies.get(1) {
                        Some(Reply::Int(created)) => Ok(*created == 1),
                        Some(other) => Err(CacheError::CorruptEntry {
                            key: key.to_string(),
                            detail: format!("unexpected field write reply: {:?}", other),
                        }),
                        None => Err(short_reply()),
                    };
                }
                self.note_generation(current);
            }
            Err(CacheError::RetryExhausted {
                attempts: self.core.options().retry_ceiling + 1,
            })
        })
    }

    fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<Vec<u8>>> {
        if key.is_empty() || field.is_empty() {
            return Ok(None);
        }
        debug!(region = self.core.name(), key, field, "fetching field");
        let namespace = self.core.namespace();
        let fetched = self.core.pool().with(|conn| {
            for _ in 0..=self.core.options().retry_ceiling {
                let generation = self.current_generation(conn)?;
                let container = namespace.global_hash_key(generation, key);
                let mut batch = CommandBatch::new();
                batch.get(namespace.generation_key());
                batch.hget(&container, field);
                let replies = RegionCore::<S, C>::run_batch(conn, batch)?;
                let current =
                    Self::reply_generation(replies.first(), namespace.generation_key())?;
                if current == generation {
                    return match replies.get(1) {
                        Some(Reply::Bytes(bytes)) => Ok(Some(bytes.clone())),
                        Some(Reply::Nil) => Ok(None),
                        Some(other) => Err(CacheError::CorruptEntry {
                            key: key.to_string(),
                            detail: format!("unexpected field read reply: {:?}", other),
                        }),
                        None => Err(short_reply()),
                    };
                }
                self.note_generation(current);
            }
            Err(CacheError::RetryExhausted {
                attempts: self.core.options().retry_ceiling + 1,
            })
        })?;
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
        let namespace = self.core.namespace();
        self.core.pool().with(|conn| {
            for _ in 0..=self.core.options().retry_ceiling {
                let generation = self.current_generation(conn)?;
                let container = namespace.global_hash_key(generation, key);
                let mut batch = CommandBatch::new();
                batch.get(namespace.generation_key());
                batch.hdel(&container, field);
                let replies = RegionCore::<S, C>::run_batch(conn, batch)?;
                let current =
                    Self::reply_generation(replies.first(), namespace.generation_key())?;
                if current == generation {
                    return match replies.get(1) {
                        Some(Reply::Int(removed)) => Ok(*removed == 1),
                        Some(other) => Err(CacheError::CorruptEntry {
                            key: key.to_string(),
                            detail: format!("unexpected field delete reply: {:?}", other),
                        }),
                        None => Err(short_reply()),
                    };
                }
                self.note_generation(current);
            }
            Err(CacheError::RetryExhausted {
                attempts: self.core.options().retry_ceiling + 1,
            })
        })
    }

    fn hash_entries(&self, key: &str) -> CacheResult<Vec<(String, Vec<u8>)>> {
        if key.is_empty() {
            return Ok(Vec::new());
        }
        debug!(region = self.core.name(), key, "fetching all fields");
        let namespace = self.core.namespace();
        let pairs = self.core.pool().with(|conn| {
            for _ in 0..=self.core.options().retry_ceiling {
                let generation = self.current_generation(conn)?;
                let container = namespace.global_hash_key(generation, key);
                let mut batch = CommandBatch::new();
                batch.get(namespace.generation_key());
                batch.hgetall(&container);
                let replies = RegionCore::<S, C>::run_batch(conn, batch)?;
                let current =
                    Self::reply_generation(replies.first(), namespace.generation_key())?;
                if current == generation {
                    return match replies.get(1) {
                        Some(Reply::Pairs(pairs)) => Ok(pairs.clone()),
                        Some(other) => Err(CacheError::CorruptEntry {
                            key: key.to_string(),
                            detail: format!("unexpected field scan reply: {:?}", other),
                        }),
                        None => Err(short_reply()),
                    };
                }
                self.note_generation(current);
            }
            Err(CacheError::RetryExhausted {
                attempts: self.core.options().retry_ceiling + 1,
            })
        })?;
        let mut entries = Vec::with_capacity(pairs.len());
        for (field, bytes) in pairs {
            let payload = self.decode_entry(key, &bytes)?.into_payload();
            entries.push((field, payload));
        }
        Ok(entries)
    }
}
