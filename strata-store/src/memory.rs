//! In-memory reference store.
//!
//! Implements the full connection contract against a process-local
//! keyspace: typed entries (string, set, hash, list), lazy TTL expiry,
//! blocking list pops, and optimistic transactions driven by per-key
//! revision counters. Every mutation bumps the touched key's revision;
//! [`exec`] commits only if no watched revision moved, which is exactly
//! the watch semantics networked stores provide.
//!
//! Cloning a [`MemoryStore`] shares the keyspace, so several clients (or
//! several providers in one process) can exercise the same cross-client
//! races a shared networked backend would.
//!
//! [`exec`]: crate::conn::StoreConnection::exec

use crate::conn::{StoreClient, StoreConnection};
use crate::error::{StoreError, StoreResult};
use crate::value::{Command, CommandBatch, Reply};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

// ============================================================================
// KEYSPACE
// ============================================================================

#[derive(Debug, Clone)]
enum Data {
    Blob(Vec<u8>),
    Set(HashSet<Vec<u8>>),
    Hash(HashMap<String, Vec<u8>>),
    List(VecDeque<Vec<u8>>),
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

impl Entry {
    fn permanent(data: Data) -> Self {
        Self {
            data,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
    /// Revision per key, bumped on every mutation including expiry sweeps.
    /// Revisions outlive their entries so watch checks survive deletes.
    revisions: HashMap<String, u64>,
}

impl Keyspace {
    fn bump(&mut self, key: &str) {
        *self.revisions.entry(key.to_string()).or_insert(0) += 1;
    }

    fn revision(&self, key: &str) -> u64 {
        self.revisions.get(key).copied().unwrap_or(0)
    }

    /// Drop the entry if its TTL has lapsed. Counts as a mutation.
    fn sweep(&mut self, key: &str) {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(Instant::now()),
            None => false,
        };
        if expired {
            self.entries.remove(key);
            self.bump(key);
        }
    }

    fn live_entry(&mut self, key: &str) -> Option<&mut Entry> {
        self.sweep(key);
        self.entries.get_mut(key)
    }

    fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match self.live_entry(key) {
            None => Ok(None),
            Some(entry) => match &entry.data {
                Data::Blob(bytes) => Ok(Some(bytes.clone())),
                _ => Err(StoreError::WrongType {
                    key: key.to_string(),
                }),
            },
        }
    }

    fn set(&mut self, key: &str, value: &[u8], expires_at: Option<Instant>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                data: Data::Blob(value.to_vec()),
                expires_at,
            },
        );
        self.bump(key);
    }

    fn set_nx(&mut self, key: &str, value: &[u8]) -> bool {
        if self.live_entry(key).is_some() {
            return false;
        }
        self.set(key, value, None);
        true
    }

    fn del(&mut self, key: &str) -> bool {
        self.sweep(key);
        let existed = self.entries.remove(key).is_some();
        if existed {
            self.bump(key);
        }
        existed
    }

    fn mget(&mut self, keys: &[String]) -> Vec<Option<Vec<u8>>> {
        keys.iter()
            .map(|key| match self.live_entry(key) {
                Some(Entry {
                    data: Data::Blob(bytes),
                    ..
                }) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    fn incr_by(&mut self, key: &str, delta: i64) -> StoreResult<i64> {
        self.sweep(key);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::permanent(Data::Blob(b"0".to_vec())));
        let next = match &mut entry.data {
            Data::Blob(bytes) => {
                let current: i64 = std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|text| text.trim().parse().ok())
                    .ok_or_else(|| StoreError::NotInteger {
                        key: key.to_string(),
                    })?;
                let next = current + delta;
                *bytes = next.to_string().into_bytes();
                next
            }
            _ => {
                return Err(StoreError::WrongType {
                    key: key.to_string(),
                })
            }
        };
        self.bump(key);
        Ok(next)
    }

    fn rename(&mut self, from: &str, to: &str) -> StoreResult<()> {
        self.sweep(from);
        match self.entries.remove(from) {
            None => Err(StoreError::MissingKey {
                key: from.to_string(),
            }),
            Some(entry) => {
                self.entries.insert(to.to_string(), entry);
                self.bump(from);
                self.bump(to);
                Ok(())
            }
        }
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.sweep(key);
        if ttl.is_zero() {
            return Ok(self.del(key));
        }
        let found = match self.entries.get_mut(key) {
            None => false,
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
        };
        if found {
            self.bump(key);
        }
        Ok(found)
    }

    fn sadd(&mut self, key: &str, member: &[u8]) -> StoreResult<bool> {
        self.sweep(key);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::permanent(Data::Set(HashSet::new())));
        let added = match &mut entry.data {
            Data::Set(members) => members.insert(member.to_vec()),
            _ => {
                return Err(StoreError::WrongType {
                    key: key.to_string(),
                })
            }
        };
        if added {
            self.bump(key);
        }
        Ok(added)
    }

    fn srem(&mut self, key: &str, member: &[u8]) -> StoreResult<bool> {
        let removed = match self.live_entry(key) {
            None => false,
            Some(entry) => match &mut entry.data {
                Data::Set(members) => members.remove(member),
                _ => {
                    return Err(StoreError::WrongType {
                        key: key.to_string(),
                    })
                }
            },
        };
        if removed {
            self.drop_if_empty(key);
            self.bump(key);
        }
        Ok(removed)
    }

    fn smembers(&mut self, key: &str) -> StoreResult<Vec<Vec<u8>>> {
        match self.live_entry(key) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.data {
                Data::Set(members) => Ok(members.iter().cloned().collect()),
                _ => Err(StoreError::WrongType {
                    key: key.to_string(),
                }),
            },
        }
    }

    fn hset(&mut self, key: &str, field: &str, value: &[u8]) -> StoreResult<bool> {
        self.sweep(key);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::permanent(Data::Hash(HashMap::new())));
        let created = match &mut entry.data {
            Data::Hash(fields) => fields.insert(field.to_string(), value.to_vec()).is_none(),
            _ => {
                return Err(StoreError::WrongType {
                    key: key.to_string(),
                })
            }
        };
        self.bump(key);
        Ok(created)
    }

    fn hget(&mut self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        match self.live_entry(key) {
            None => Ok(None),
            Some(entry) => match &entry.data {
                Data::Hash(fields) => Ok(fields.get(field).cloned()),
                _ => Err(StoreError::WrongType {
                    key: key.to_string(),
                }),
            },
        }
    }

    fn hdel(&mut self, key: &str, field: &str) -> StoreResult<bool> {
        let removed = match self.live_entry(key) {
            None => false,
            Some(entry) => match &mut entry.data {
                Data::Hash(fields) => fields.remove(field).is_some(),
                _ => {
                    return Err(StoreError::WrongType {
                        key: key.to_string(),
                    })
                }
            },
        };
        if removed {
            self.drop_if_empty(key);
            self.bump(key);
        }
        Ok(removed)
    }

    /// Pairs sorted by field so reads are deterministic.
    fn hgetall(&mut self, key: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        match self.live_entry(key) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.data {
                Data::Hash(fields) => {
                    let mut pairs: Vec<_> = fields
                        .iter()
                        .map(|(field, value)| (field.clone(), value.clone()))
                        .collect();
                    pairs.sort_by(|a, b| a.0.cmp(&b.0));
                    Ok(pairs)
                }
                _ => Err(StoreError::WrongType {
                    key: key.to_string(),
                }),
            },
        }
    }

    fn rpush(&mut self, key: &str, value: &[u8]) -> StoreResult<i64> {
        self.sweep(key);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::permanent(Data::List(VecDeque::new())));
        let len = match &mut entry.data {
            Data::List(items) => {
                items.push_back(value.to_vec());
                items.len() as i64
            }
            _ => {
                return Err(StoreError::WrongType {
                    key: key.to_string(),
                })
            }
        };
        self.bump(key);
        Ok(len)
    }

    fn lpop(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let popped = match self.live_entry(key) {
            None => None,
            Some(entry) => match &mut entry.data {
                Data::List(items) => items.pop_front(),
                _ => {
                    return Err(StoreError::WrongType {
                        key: key.to_string(),
                    })
                }
            },
        };
        if popped.is_some() {
            self.drop_if_empty(key);
            self.bump(key);
        }
        Ok(popped)
    }

    /// Containers do not linger once their last member is gone.
    fn drop_if_empty(&mut self, key: &str) {
        let empty = match self.entries.get(key) {
            Some(Entry {
                data: Data::Set(members),
                ..
            }) => members.is_empty(),
            Some(Entry {
                data: Data::Hash(fields),
                ..
            }) => fields.is_empty(),
            Some(Entry {
                data: Data::List(items),
                ..
            }) => items.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }

    fn apply(&mut self, command: Command) -> Reply {
        match command {
            Command::Get(key) => match self.get(&key) {
                Ok(Some(bytes)) => Reply::Bytes(bytes),
                Ok(None) => Reply::Nil,
                Err(e) => Reply::Failed(e.to_string()),
            },
            Command::Set { key, value } => {
                self.set(&key, &value, None);
                Reply::Okay
            }
            Command::SetEx { key, value, ttl } => {
                self.set(&key, &value, Some(Instant::now() + ttl));
                Reply::Okay
            }
            Command::Del(key) => Reply::Int(i64::from(self.del(&key))),
            Command::IncrBy { key, delta } => match self.incr_by(&key, delta) {
                Ok(next) => Reply::Int(next),
                Err(e) => Reply::Failed(e.to_string()),
            },
            Command::Rename { from, to } => match self.rename(&from, &to) {
                Ok(()) => Reply::Okay,
                Err(e) => Reply::Failed(e.to_string()),
            },
            Command::SAdd { key, member } => match self.sadd(&key, &member) {
                Ok(added) => Reply::Int(i64::from(added)),
                Err(e) => Reply::Failed(e.to_string()),
            },
            Command::SRem { key, member } => match self.srem(&key, &member) {
                Ok(removed) => Reply::Int(i64::from(removed)),
                Err(e) => Reply::Failed(e.to_string()),
            },
            Command::RPush { key, value } => match self.rpush(&key, &value) {
                Ok(len) => Reply::Int(len),
                Err(e) => Reply::Failed(e.to_string()),
            },
            Command::HSet { key, field, value } => match self.hset(&key, &field, &value) {
                Ok(created) => Reply::Int(i64::from(created)),
                Err(e) => Reply::Failed(e.to_string()),
            },
            Command::HGet { key, field } => match self.hget(&key, &field) {
                Ok(Some(bytes)) => Reply::Bytes(bytes),
                Ok(None) => Reply::Nil,
                Err(e) => Reply::Failed(e.to_string()),
            },
            Command::HDel { key, field } => match self.hdel(&key, &field) {
                Ok(removed) => Reply::Int(i64::from(removed)),
                Err(e) => Reply::Failed(e.to_string()),
            },
            Command::HGetAll(key) => match self.hgetall(&key) {
                Ok(pairs) => Reply::Pairs(pairs),
                Err(e) => Reply::Failed(e.to_string()),
            },
        }
    }
}

// ============================================================================
// STORE AND CONNECTIONS
// ============================================================================

#[derive(Debug)]
struct SharedState {
    keyspace: Mutex<Keyspace>,
    /// Woken whenever a list grows, for blocking pops.
    wakeup: Condvar,
}

impl SharedState {
    fn lock(&self) -> StoreResult<MutexGuard<'_, Keyspace>> {
        self.keyspace.lock().map_err(|_| StoreError::Poisoned)
    }
}

/// Handle to an in-memory keyspace. Clones share the keyspace.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<SharedState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SharedState {
                keyspace: Mutex::new(Keyspace::default()),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// The process-wide default store.
    ///
    /// Clients built from plain settings (rather than an explicit store
    /// handle) all land here, which makes independent providers in one
    /// process behave like separate processes sharing one backend.
    pub fn shared() -> MemoryStore {
        static SHARED: Lazy<MemoryStore> = Lazy::new(MemoryStore::new);
        SHARED.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreClient for MemoryStore {
    type Conn = MemoryConnection;

    fn connect(&self) -> StoreResult<MemoryConnection> {
        Ok(MemoryConnection {
            shared: Arc::clone(&self.shared),
            watched: HashMap::new(),
        })
    }
}

/// One connection against a [`MemoryStore`] keyspace.
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<SharedState>,
    /// Watched key revisions as of the last watch or aborted exec.
    watched: HashMap<String, u64>,
}

impl StoreConnection for MemoryConnection {
    fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.shared.lock()?.get(key)
    }

    fn set(&mut self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.shared.lock()?.set(key, value, None);
        Ok(())
    }

    fn set_ex(&mut self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        self.shared
            .lock()?
            .set(key, value, Some(Instant::now() + ttl));
        Ok(())
    }

    fn set_nx(&mut self, key: &str, value: &[u8]) -> StoreResult<bool> {
        Ok(self.shared.lock()?.set_nx(key, value))
    }

    fn del(&mut self, key: &str) -> StoreResult<bool> {
        Ok(self.shared.lock()?.del(key))
    }

    fn mget(&mut self, keys: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        Ok(self.shared.lock()?.mget(keys))
    }

    fn incr_by(&mut self, key: &str, delta: i64) -> StoreResult<i64> {
        self.shared.lock()?.incr_by(key, delta)
    }

    fn rename(&mut self, from: &str, to: &str) -> StoreResult<()> {
        self.shared.lock()?.rename(from, to)
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.shared.lock()?.expire(key, ttl)
    }

    fn sadd(&mut self, key: &str, member: &[u8]) -> StoreResult<bool> {
        self.shared.lock()?.sadd(key, member)
    }

    fn srem(&mut self, key: &str, member: &[u8]) -> StoreResult<bool> {
        self.shared.lock()?.srem(key, member)
    }

    fn smembers(&mut self, key: &str) -> StoreResult<Vec<Vec<u8>>> {
        self.shared.lock()?.smembers(key)
    }

    fn hset(&mut self, key: &str, field: &str, value: &[u8]) -> StoreResult<bool> {
        self.shared.lock()?.hset(key, field, value)
    }

    fn hget(&mut self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        self.shared.lock()?.hget(key, field)
    }

    fn hdel(&mut self, key: &str, field: &str) -> StoreResult<bool> {
        self.shared.lock()?.hdel(key, field)
    }

    fn hgetall(&mut self, key: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        self.shared.lock()?.hgetall(key)
    }

    fn rpush(&mut self, key: &str, value: &[u8]) -> StoreResult<i64> {
        let len = self.shared.lock()?.rpush(key, value)?;
        self.shared.wakeup.notify_all();
        Ok(len)
    }

    fn blpop(&mut self, key: &str, timeout: Duration) -> StoreResult<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        let mut keyspace = self.shared.lock()?;
        loop {
            if let Some(value) = keyspace.lpop(key)? {
                return Ok(Some(value));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self
                .shared
                .wakeup
                .wait_timeout(keyspace, deadline - now)
                .map_err(|_| StoreError::Poisoned)?;
            keyspace = guard;
        }
    }

    fn watch(&mut self, keys: &[String]) -> StoreResult<()> {
        let mut keyspace = self.shared.lock()?;
        for key in keys {
            keyspace.sweep(key);
            self.watched.insert(key.clone(), keyspace.revision(key));
        }
        Ok(())
    }

    fn unwatch(&mut self) -> StoreResult<()> {
        self.watched.clear();
        Ok(())
    }

    fn exec(&mut self, batch: CommandBatch) -> StoreResult<Option<Vec<Reply>>> {
        let mut keyspace = self.shared.lock()?;
        if !self.watched.is_empty() {
            for key in self.watched.keys() {
                keyspace.sweep(key);
            }
            let dirty = self
                .watched
                .iter()
                .any(|(key, seen)| keyspace.revision(key) != *seen);
            if dirty {
                // Re-arm against the current state so the caller can
                // re-read and retry without watching again.
                for (key, seen) in self.watched.iter_mut() {
                    *seen = keyspace.revision(key);
                }
                return Ok(None);
            }
        }

        let commands = batch.into_commands();
        let pushed = commands
            .iter()
            .any(|command| matches!(command, Command::RPush { .. }));
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            replies.push(keyspace.apply(command));
        }
        self.watched.clear();
        drop(keyspace);
        if pushed {
            self.shared.wakeup.notify_all();
        }
        Ok(Some(replies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn make_conn() -> (MemoryStore, MemoryConnection) {
        let store = MemoryStore::new();
        let conn = store.connect().unwrap();
        (store, conn)
    }

    #[test]
    fn test_get_set_roundtrip() {
        let (_store, mut conn) = make_conn();
        assert_eq!(conn.get("k").unwrap(), None);
        conn.set("k", b"v").unwrap();
        assert_eq!(conn.get("k").unwrap(), Some(b"v".to_vec()));
        assert!(conn.del("k").unwrap());
        assert!(!conn.del("k").unwrap());
    }

    #[test]
    fn test_set_ex_expires() {
        let (_store, mut conn) = make_conn();
        conn.set_ex("k", b"v", Duration::from_millis(20)).unwrap();
        assert_eq!(conn.get("k").unwrap(), Some(b"v".to_vec()));
        thread::sleep(Duration::from_millis(40));
        assert_eq!(conn.get("k").unwrap(), None);
    }

    #[test]
    fn test_set_nx() {
        let (_store, mut conn) = make_conn();
        assert!(conn.set_nx("k", b"first").unwrap());
        assert!(!conn.set_nx("k", b"second").unwrap());
        assert_eq!(conn.get("k").unwrap(), Some(b"first".to_vec()));
    }

    #[test]
    fn test_set_nx_wins_after_expiry() {
        let (_store, mut conn) = make_conn();
        conn.set_ex("k", b"old", Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(conn.set_nx("k", b"new").unwrap());
    }

    #[test]
    fn test_incr_by() {
        let (_store, mut conn) = make_conn();
        assert_eq!(conn.incr_by("n", 0).unwrap(), 0);
        assert_eq!(conn.incr_by("n", 1).unwrap(), 1);
        assert_eq!(conn.incr_by("n", 5).unwrap(), 6);
        assert_eq!(conn.get("n").unwrap(), Some(b"6".to_vec()));
    }

    #[test]
    fn test_incr_by_rejects_non_integer() {
        let (_store, mut conn) = make_conn();
        conn.set("n", b"abc").unwrap();
        assert!(matches!(
            conn.incr_by("n", 1),
            Err(StoreError::NotInteger { .. })
        ));
    }

    #[test]
    fn test_wrong_type_get() {
        let (_store, mut conn) = make_conn();
        conn.sadd("s", b"m").unwrap();
        assert!(matches!(conn.get("s"), Err(StoreError::WrongType { .. })));
    }

    #[test]
    fn test_mget_skips_absent_and_wrong_type() {
        let (_store, mut conn) = make_conn();
        conn.set("a", b"1").unwrap();
        conn.sadd("s", b"m").unwrap();
        let got = conn
            .mget(&["a".to_string(), "missing".to_string(), "s".to_string()])
            .unwrap();
        assert_eq!(got, vec![Some(b"1".to_vec()), None, None]);
    }

    #[test]
    fn test_rename_moves_entry() {
        let (_store, mut conn) = make_conn();
        conn.set("a", b"v").unwrap();
        conn.rename("a", "b").unwrap();
        assert_eq!(conn.get("a").unwrap(), None);
        assert_eq!(conn.get("b").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_rename_missing_source() {
        let (_store, mut conn) = make_conn();
        assert!(matches!(
            conn.rename("nope", "dest"),
            Err(StoreError::MissingKey { .. })
        ));
    }

    #[test]
    fn test_expire_zero_deletes() {
        let (_store, mut conn) = make_conn();
        conn.set("k", b"v").unwrap();
        assert!(conn.expire("k", Duration::ZERO).unwrap());
        assert_eq!(conn.get("k").unwrap(), None);
        assert!(!conn.expire("k", Duration::ZERO).unwrap());
    }

    #[test]
    fn test_set_ops() {
        let (_store, mut conn) = make_conn();
        assert!(conn.sadd("s", b"a").unwrap());
        assert!(!conn.sadd("s", b"a").unwrap());
        assert!(conn.sadd("s", b"b").unwrap());
        let mut members = conn.smembers("s").unwrap();
        members.sort();
        assert_eq!(members, vec![b"a".to_vec(), b"b".to_vec()]);
        assert!(conn.srem("s", b"a").unwrap());
        assert!(conn.srem("s", b"b").unwrap());
        // Container disappears with its last member.
        assert_eq!(conn.get("s").unwrap(), None);
    }

    #[test]
    fn test_hash_ops() {
        let (_store, mut conn) = make_conn();
        assert!(conn.hset("h", "f1", b"v1").unwrap());
        assert!(!conn.hset("h", "f1", b"v2").unwrap());
        assert!(conn.hset("h", "f2", b"v3").unwrap());
        assert_eq!(conn.hget("h", "f1").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(conn.hget("h", "missing").unwrap(), None);
        let pairs = conn.hgetall("h").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("f1".to_string(), b"v2".to_vec()),
                ("f2".to_string(), b"v3".to_vec()),
            ]
        );
        assert!(conn.hdel("h", "f1").unwrap());
        assert!(conn.hdel("h", "f2").unwrap());
        assert_eq!(conn.hgetall("h").unwrap(), Vec::new());
    }

    #[test]
    fn test_rpush_blpop_immediate() {
        let (_store, mut conn) = make_conn();
        conn.rpush("q", b"first").unwrap();
        conn.rpush("q", b"second").unwrap();
        assert_eq!(
            conn.blpop("q", Duration::from_millis(10)).unwrap(),
            Some(b"first".to_vec())
        );
        assert_eq!(
            conn.blpop("q", Duration::from_millis(10)).unwrap(),
            Some(b"second".to_vec())
        );
    }

    #[test]
    fn test_blpop_times_out() {
        let (_store, mut conn) = make_conn();
        let started = Instant::now();
        assert_eq!(conn.blpop("q", Duration::from_millis(30)).unwrap(), None);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_blpop_wakes_on_push() {
        let (store, mut conn) = make_conn();
        let pusher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            let mut other = store.connect().unwrap();
            other.rpush("q", b"item").unwrap();
        });
        let got = conn.blpop("q", Duration::from_secs(5)).unwrap();
        assert_eq!(got, Some(b"item".to_vec()));
        pusher.join().unwrap();
    }

    #[test]
    fn test_exec_without_watch_commits() {
        let (_store, mut conn) = make_conn();
        let mut batch = CommandBatch::new();
        batch.set("a", b"1");
        batch.incr_by("n", 2);
        batch.get("a");
        let replies = conn.exec(batch).unwrap().unwrap();
        assert_eq!(
            replies,
            vec![Reply::Okay, Reply::Int(2), Reply::Bytes(b"1".to_vec())]
        );
    }

    #[test]
    fn test_exec_aborts_when_watched_key_touched() {
        let (store, mut conn) = make_conn();
        conn.set("k", b"old").unwrap();
        conn.watch(&["k".to_string()]).unwrap();

        let mut other = store.connect().unwrap();
        other.set("k", b"intruder").unwrap();

        let mut batch = CommandBatch::new();
        batch.set("k", b"mine");
        assert_eq!(conn.exec(batch).unwrap(), None);
        // The competing write survived.
        assert_eq!(conn.get("k").unwrap(), Some(b"intruder".to_vec()));
    }

    #[test]
    fn test_exec_rearms_watch_after_abort() {
        let (store, mut conn) = make_conn();
        conn.set("k", b"old").unwrap();
        conn.watch(&["k".to_string()]).unwrap();

        let mut other = store.connect().unwrap();
        other.set("k", b"intruder").unwrap();

        let mut batch = CommandBatch::new();
        batch.set("k", b"mine");
        assert_eq!(conn.exec(batch.clone()).unwrap(), None);

        // No further interference: the re-armed watch lets the retry in.
        let replies = conn.exec(batch).unwrap();
        assert!(replies.is_some());
        assert_eq!(conn.get("k").unwrap(), Some(b"mine".to_vec()));
    }

    #[test]
    fn test_exec_abort_applies_nothing() {
        let (store, mut conn) = make_conn();
        conn.watch(&["k".to_string()]).unwrap();
        let mut other = store.connect().unwrap();
        other.set("k", b"x").unwrap();

        let mut batch = CommandBatch::new();
        batch.set("unrelated", b"v");
        assert_eq!(conn.exec(batch).unwrap(), None);
        assert_eq!(conn.get("unrelated").unwrap(), None);
    }

    #[test]
    fn test_exec_clears_watch_on_commit() {
        let (store, mut conn) = make_conn();
        conn.watch(&["k".to_string()]).unwrap();
        let mut batch = CommandBatch::new();
        batch.set("k", b"v");
        assert!(conn.exec(batch).unwrap().is_some());

        // Watch is gone: competing writes no longer abort.
        let mut other = store.connect().unwrap();
        other.set("k", b"other").unwrap();
        let mut second = CommandBatch::new();
        second.set("k", b"again");
        assert!(conn.exec(second).unwrap().is_some());
    }

    #[test]
    fn test_watch_sees_expiry_as_change() {
        let (_store, mut conn) = make_conn();
        conn.set_ex("k", b"v", Duration::from_millis(10)).unwrap();
        conn.watch(&["k".to_string()]).unwrap();
        thread::sleep(Duration::from_millis(30));

        let mut batch = CommandBatch::new();
        batch.set("k", b"mine");
        assert_eq!(conn.exec(batch).unwrap(), None);
    }

    #[test]
    fn test_unwatch_disarms() {
        let (store, mut conn) = make_conn();
        conn.watch(&["k".to_string()]).unwrap();
        let mut other = store.connect().unwrap();
        other.set("k", b"x").unwrap();

        conn.unwatch().unwrap();
        let mut batch = CommandBatch::new();
        batch.set("k", b"mine");
        assert!(conn.exec(batch).unwrap().is_some());
    }

    #[test]
    fn test_exec_tolerates_failed_rename() {
        let (_store, mut conn) = make_conn();
        let mut batch = CommandBatch::new();
        batch.incr_by("gen", 1);
        batch.rename("missing", "dest");
        batch.rpush("queue", b"name");
        let replies = conn.exec(batch).unwrap().unwrap();
        assert_eq!(replies[0], Reply::Int(1));
        assert!(replies[1].is_failed());
        assert_eq!(replies[2], Reply::Int(1));
        // Surrounding commands still applied.
        assert_eq!(conn.incr_by("gen", 0).unwrap(), 1);
        assert_eq!(
            conn.blpop("queue", Duration::from_millis(10)).unwrap(),
            Some(b"name".to_vec())
        );
    }

    #[test]
    fn test_clones_share_keyspace() {
        let store = MemoryStore::new();
        let clone = store.clone();
        let mut a = store.connect().unwrap();
        let mut b = clone.connect().unwrap();
        a.set("k", b"v").unwrap();
        assert_eq!(b.get("k").unwrap(), Some(b"v".to_vec()));
    }
}
