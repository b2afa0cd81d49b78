//! Store-backed mutual exclusion.
//!
//! A lock is a single key whose value is the holder's expiry timestamp
//! in UTC seconds. No key means no holder. Whether an existing lock is
//! still live is a pure function of wall-clock time against that stored
//! value, so a crashed holder needs no heartbeat to be recovered: any
//! later acquirer sees the stale timestamp and seizes the key under a
//! watch. Clock skew between processes shortens or stretches leases; the
//! one-second grace added to every token absorbs small drift.

use crate::error::{CacheError, CacheResult};
use crate::region::abandon_watch;
use chrono::Utc;
use std::thread;
use std::time::{Duration, Instant};
use strata_store::{CommandBatch, StoreConnection};
use tracing::{debug, error};

/// Delay between acquisition attempts while another holder is live.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A granted lease: the expiry timestamp stored under the lock key.
/// Release only removes the key while it still carries this exact value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LockToken(f64);

impl LockToken {
    fn candidate(lock_timeout: Duration) -> Self {
        let now = Utc::now().timestamp() as f64;
        LockToken(now + lock_timeout.as_secs() as f64 + 1.0)
    }

    fn is_expired(&self, now_seconds: f64) -> bool {
        self.0 < now_seconds
    }

    fn encode(&self) -> Vec<u8> {
        self.0.to_string().into_bytes()
    }

    fn decode(bytes: &[u8]) -> Option<LockToken> {
        std::str::from_utf8(bytes)
            .ok()?
            .trim()
            .parse()
            .ok()
            .map(LockToken)
    }
}

/// Try to take the lock within `acquisition_timeout`.
///
/// Returns the granted token, or `None` when every attempt found a live
/// holder until the patience ran out. Running out of patience is an
/// ordinary outcome for the caller to handle, not an error.
pub(crate) fn acquire<Conn: StoreConnection>(
    conn: &mut Conn,
    lock_key: &str,
    acquisition_timeout: Duration,
    lock_timeout: Duration,
) -> CacheResult<Option<LockToken>> {
    let deadline = Instant::now() + acquisition_timeout;
    loop {
        let token = LockToken::candidate(lock_timeout);
        if conn.set_nx(lock_key, &token.encode())? {
            return Ok(Some(token));
        }

        // A holder exists. If its timestamp already lapsed the holder is
        // gone; overwrite under a watch so only one claimant wins.
        conn.watch(&[lock_key.to_string()])?;
        let held = match conn.get(lock_key) {
            Ok(held) => held,
            Err(e) => return Err(abandon_watch(conn, e.into())),
        };
        let seizable = match held {
            None => true,
            Some(bytes) => match LockToken::decode(&bytes) {
                Some(current) => current.is_expired(Utc::now().timestamp() as f64),
                None => {
                    error!(lock_key, "lock value is not a timestamp");
                    let err = CacheError::CorruptEntry {
                        key: lock_key.to_string(),
                        detail: "lock value is not a timestamp".to_string(),
                    };
                    return Err(abandon_watch(conn, err));
                }
            },
        };
        if seizable {
            let mut batch = CommandBatch::new();
            batch.set(lock_key, &token.encode());
            match conn.exec(batch) {
                Ok(Some(_)) => {
                    debug!(lock_key, "seized abandoned lock");
                    return Ok(Some(token));
                }
                // Another claimant beat us to the seizure.
                Ok(None) => {}
                Err(e) => return Err(abandon_watch(conn, e.into())),
            }
        }
        conn.unwatch()?;

        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Release the lock if it still belongs to `token`.
///
/// Returns false when the key is absent or carries someone else's token
/// (the lease expired and was reclaimed). Either way the other holder's
/// state is left untouched, so double and late unlocks are harmless.
pub(crate) fn release<Conn: StoreConnection>(
    conn: &mut Conn,
    lock_key: &str,
    token: LockToken,
) -> CacheResult<bool> {
    conn.watch(&[lock_key.to_string()])?;
    let ours = match conn.get(lock_key) {
        Ok(Some(bytes)) => LockToken::decode(&bytes) == Some(token),
        Ok(None) => false,
        Err(e) => return Err(abandon_watch(conn, e.into())),
    };
    if !ours {
        conn.unwatch()?;
        return Ok(false);
    }
    let mut batch = CommandBatch::new();
    batch.del(lock_key);
    match conn.exec(batch) {
        Ok(Some(_)) => Ok(true),
        Ok(None) => {
            // The key changed hands between the read and the delete.
            conn.unwatch()?;
            Ok(false)
        }
        Err(e) => Err(abandon_watch(conn, e.into())),
    }
}
