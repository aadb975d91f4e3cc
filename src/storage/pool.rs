//! Bounded connection pool.
//!
//! At most `max_open` connections exist at once; callers past that bound
//! wait for a slot. Returned connections are kept for reuse up to
//! `max_idle`, and discarded once older than the configured lifetime.
//!
//! Connections are opened lazily inside the blocking section that first
//! uses them, so acquiring a slot never touches the engine.

use crate::core::error::{StoreError, StoreResult};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Opens and prepares one engine connection.
pub type Opener = Arc<dyn Fn() -> rusqlite::Result<Connection> + Send + Sync>;

/// Pool bounds.
#[derive(Debug, Clone, Copy)]
pub struct PoolLimits {
    pub max_open: usize,
    pub max_idle: usize,
    pub max_lifetime: Option<Duration>,
}

struct IdleConnection {
    conn: Connection,
    opened_at: Instant,
}

struct PoolInner {
    opener: Opener,
    limits: PoolLimits,
    open_slots: Arc<Semaphore>,
    idle: Mutex<Vec<IdleConnection>>,
}

impl PoolInner {
    fn expired(&self, opened_at: Instant) -> bool {
        self.limits
            .max_lifetime
            .is_some_and(|lifetime| opened_at.elapsed() >= lifetime)
    }
}

/// Shared handle to a connection pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("limits", &self.inner.limits)
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(opener: Opener, limits: PoolLimits) -> Self {
        let limits = PoolLimits {
            max_open: limits.max_open.max(1),
            max_idle: limits.max_idle.min(limits.max_open.max(1)),
            max_lifetime: limits.max_lifetime,
        };
        Self {
            inner: Arc::new(PoolInner {
                opener,
                open_slots: Arc::new(Semaphore::new(limits.max_open)),
                idle: Mutex::new(Vec::with_capacity(limits.max_idle)),
                limits,
            }),
        }
    }

    /// Wait for an open-connection slot.
    pub async fn get(&self) -> StoreResult<PooledConnection> {
        let permit = self
            .inner
            .open_slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Unavailable {
                message: "connection pool closed".to_string(),
            })?;

        let reused = {
            let mut idle = self.inner.idle.lock();
            let mut found = None;
            while let Some(candidate) = idle.pop() {
                if !self.inner.expired(candidate.opened_at) {
                    found = Some(candidate);
                    break;
                }
            }
            found
        };

        let (conn, opened_at) = match reused {
            Some(idle) => (Some(idle.conn), idle.opened_at),
            None => (None, Instant::now()),
        };
        Ok(PooledConnection {
            conn,
            opened_at,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Idle connections currently held.
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Slots not currently checked out.
    pub fn available(&self) -> usize {
        self.inner.open_slots.available_permits()
    }

    /// Refuse new checkouts and drop idle connections.
    pub fn close(&self) {
        self.inner.open_slots.close();
        self.inner.idle.lock().clear();
    }
}

/// A checked-out connection slot. Returned to the pool on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    opened_at: Instant,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// The connection, opened on first use. Blocking.
    pub fn connection(&mut self) -> rusqlite::Result<&mut Connection> {
        if self.conn.is_none() {
            self.conn = Some((self.pool.opener)()?);
            self.opened_at = Instant::now();
        }
        match self.conn.as_mut() {
            Some(conn) => Ok(conn),
            None => Err(rusqlite::Error::InvalidQuery),
        }
    }

    /// Drop the connection instead of returning it for reuse.
    pub fn discard(&mut self) {
        self.conn = None;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.pool.open_slots.is_closed() || self.pool.expired(self.opened_at) {
            return;
        }
        let mut idle = self.pool.idle.lock();
        if idle.len() < self.pool.limits.max_idle {
            idle.push(IdleConnection {
                conn,
                opened_at: self.opened_at,
            });
        }
    }
}
