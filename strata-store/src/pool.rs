//! Bounded connection pool.
//!
//! Connections are created up front and parked on a channel. A checkout
//! borrows one for the duration of a closure and always parks it again
//! on the way out, so error returns inside the closure cannot leak
//! connections. Checkouts that cannot be served within the configured
//! timeout fail with [`StoreError::PoolExhausted`].

use crate::conn::{StoreClient, StoreConnection};
use crate::error::{StoreError, StoreResult};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::warn;

/// Pool sizing and patience.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_size: usize,
    pub checkout_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 10,
            checkout_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolOptions {
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_checkout_timeout(mut self, checkout_timeout: Duration) -> Self {
        self.checkout_timeout = checkout_timeout;
        self
    }
}

/// A fixed-size pool of store connections.
pub struct ConnectionPool<S: StoreClient> {
    idle_tx: Sender<S::Conn>,
    idle_rx: Receiver<S::Conn>,
    checkout_timeout: Duration,
}

impl<S: StoreClient> ConnectionPool<S> {
    /// Connect `max_size` connections and park them.
    pub fn new(client: &S, options: PoolOptions) -> StoreResult<Self> {
        let (idle_tx, idle_rx) = bounded(options.max_size);
        for _ in 0..options.max_size {
            let conn = client.connect()?;
            idle_tx.send(conn).map_err(|_| StoreError::Transport {
                reason: "pool channel closed during fill".to_string(),
            })?;
        }
        Ok(Self {
            idle_tx,
            idle_rx,
            checkout_timeout: options.checkout_timeout,
        })
    }

    /// Connections currently parked.
    pub fn idle(&self) -> usize {
        self.idle_rx.len()
    }

    /// Run `f` with a checked-out connection.
    ///
    /// The connection goes back to the pool whether `f` succeeds or
    /// fails, with any leftover watch state cleared first. A connection
    /// that cannot be reset is discarded instead of parked.
    pub fn with<R, E>(&self, f: impl FnOnce(&mut S::Conn) -> Result<R, E>) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        let mut conn = match self.idle_rx.recv_timeout(self.checkout_timeout) {
            Ok(conn) => conn,
            Err(RecvTimeoutError::Timeout) => {
                warn!(waited_ms = self.checkout_timeout.as_millis() as u64, "connection checkout timed out");
                return Err(StoreError::PoolExhausted {
                    waited: self.checkout_timeout,
                }
                .into());
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(StoreError::Transport {
                    reason: "pool channel closed".to_string(),
                }
                .into())
            }
        };
        let result = f(&mut conn);
        if conn.unwatch().is_ok() {
            let _ = self.idle_tx.send(conn);
        } else {
            warn!("discarding connection that failed to reset");
        }
        result
    }
}
