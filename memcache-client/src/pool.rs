//! Bounded, lazily filled connection pools, one per node.
//!
//! Each node may have at most `capacity` open connections. Sockets are only
//! opened when an acquire finds no idle connection and a free slot. Callers
//! that find neither wait in FIFO order: every waiter takes a ticket and
//! only the head of the queue may claim a connection or a slot.
//!
//! Connections are handed out inside a [`PooledConnection`] guard, which
//! returns them on drop. A connection that went unhealthy while checked out
//! is closed and its slot freed instead.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::metrics::POOL_EXHAUSTED;

struct PoolState {
    idle: VecDeque<Connection>,
    /// Idle plus checked out plus being opened.
    open: usize,
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

impl PoolState {
    fn can_serve(&self, capacity: usize) -> bool {
        !self.idle.is_empty() || self.open < capacity
    }
}

/// What the head of the queue claimed.
enum Claim {
    Idle(Connection),
    Slot,
}

pub(crate) struct NodePool {
    node: String,
    capacity: usize,
    acquire_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl NodePool {
    pub(crate) fn new(node: &str, config: &ClientConfig) -> Self {
        let capacity = config.pool_size.max(1);
        Self {
            node: node.to_owned(),
            capacity,
            acquire_timeout: config.acquire_timeout,
            idle_timeout: config.idle_timeout,
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(capacity),
                open: 0,
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
            available: Condvar::new(),
        }
    }

    pub(crate) fn node(&self) -> &str {
        &self.node
    }

    /// Check out a connection, opening one if a slot is free.
    ///
    /// Blocks for up to `acquire_timeout` when the node is at capacity.
    pub(crate) fn acquire(&self, config: &ClientConfig) -> Result<PooledConnection<'_>> {
        match self.claim()? {
            Claim::Idle(conn) => Ok(PooledConnection::new(self, conn)),
            Claim::Slot => match Connection::open(&self.node, config) {
                Ok(conn) => Ok(PooledConnection::new(self, conn)),
                Err(err) => {
                    self.free_slot();
                    Err(err)
                }
            },
        }
    }

    fn claim(&self) -> Result<Claim> {
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);

        let deadline = self.acquire_timeout.map(|t| Instant::now() + t);
        loop {
            self.prune_stale(&mut state);
            if state.waiters.front() == Some(&ticket) && state.can_serve(self.capacity) {
                state.waiters.pop_front();
                let claim = match state.idle.pop_back() {
                    Some(conn) => Claim::Idle(conn),
                    None => {
                        state.open += 1;
                        Claim::Slot
                    }
                };
                if !state.waiters.is_empty() && state.can_serve(self.capacity) {
                    self.available.notify_all();
                }
                return Ok(claim);
            }

            state = match deadline {
                None => self
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        state.waiters.retain(|&t| t != ticket);
                        // the next waiter may now be at the head
                        self.available.notify_all();
                        drop(state);
                        POOL_EXHAUSTED.increment();
                        warn!(node = %self.node, capacity = self.capacity, "connection pool exhausted");
                        return Err(Error::PoolExhausted {
                            node: self.node.clone(),
                        });
                    }
                    self.available
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn prune_stale(&self, state: &mut PoolState) {
        let Some(limit) = self.idle_timeout else {
            return;
        };
        let before = state.idle.len();
        state.idle.retain(|conn| conn.idle_for() < limit);
        let closed = before - state.idle.len();
        if closed > 0 {
            state.open -= closed;
            debug!(node = %self.node, closed, "closed stale idle connections");
        }
    }

    fn free_slot(&self) {
        let mut state = self.lock();
        state.open -= 1;
        self.available.notify_all();
    }

    fn release(&self, conn: Connection) {
        let mut state = self.lock();
        if conn.is_healthy() {
            state.idle.push_back(conn);
        } else {
            state.open -= 1;
            drop(conn);
        }
        self.available.notify_all();
    }

    /// Close every idle connection. Checked-out connections are unaffected.
    pub(crate) fn close_idle(&self) -> usize {
        let mut state = self.lock();
        let closed = state.idle.len();
        state.idle.clear();
        state.open -= closed;
        self.available.notify_all();
        closed
    }

    #[cfg(test)]
    fn counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.open, state.idle.len())
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A checked-out connection, returned to its pool on drop.
pub(crate) struct PooledConnection<'a> {
    pool: &'a NodePool,
    conn: Option<Connection>,
}

impl<'a> PooledConnection<'a> {
    fn new(pool: &'a NodePool, conn: Connection) -> Self {
        Self {
            pool,
            conn: Some(conn),
        }
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // only taken in drop
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
