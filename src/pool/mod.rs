//! Outbound client pool.
//!
//! # Responsibilities
//! - Lend reusable outbound clients to the HTTP forwarder
//! - Create clients lazily when none are idle
//! - Take clients back after every exchange, successful or not
//!
//! # Design Decisions
//! - Typed over the client, so acquire never downcasts
//! - Never blocks and never fails: backpressure lives in the listener's per-IP cap
//! - Outstanding clients are unbounded; idle retention is capped at `max_idle`
//! - Checkout is an RAII guard, so release happens on every exit path

pub mod client;

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use client::{ForwardError, OutboundClient, ReadTimeoutBody};

type Factory<C> = Box<dyn Fn() -> C + Send + Sync>;

/// A pool of reusable clients of type `C`.
pub struct ClientPool<C> {
    idle: Mutex<Vec<C>>,
    factory: Factory<C>,
    max_idle: usize,
    created: AtomicUsize,
}

impl<C> ClientPool<C> {
    /// Create an empty pool. `factory` runs on acquire when no client is idle.
    pub fn new<F>(max_idle: usize, factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        Self {
            idle: Mutex::new(Vec::new()),
            factory: Box::new(factory),
            max_idle,
            created: AtomicUsize::new(0),
        }
    }

    /// Check out a client, building a fresh one if none is idle.
    pub fn acquire(&self) -> PooledClient<'_, C> {
        let reused = self.lock_idle().pop();
        let client = reused.unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            (self.factory)()
        });
        PooledClient {
            pool: self,
            client: Some(client),
        }
    }

    /// Return a client for reuse. Dropped instead if `max_idle` clients are already idle.
    pub fn release(&self, client: C) {
        let mut idle = self.lock_idle();
        if idle.len() < self.max_idle {
            idle.push(client);
        }
    }

    /// Number of clients currently waiting in the pool.
    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    /// Number of clients the factory has built over the pool's lifetime.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    // A panic while holding the lock cannot leave the Vec half-modified.
    fn lock_idle(&self) -> MutexGuard<'_, Vec<C>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C> fmt::Debug for ClientPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientPool")
            .field("idle", &self.idle_count())
            .field("created", &self.created_count())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

/// A checked-out client. Returned to its pool when dropped.
pub struct PooledClient<'a, C> {
    pool: &'a ClientPool<C>,
    client: Option<C>,
}

impl<C> Deref for PooledClient<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only `drop` takes the client out.
        self.client.as_ref().unwrap_or_else(|| unreachable!("client already released"))
    }
}

impl<C> DerefMut for PooledClient<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.client.as_mut().unwrap_or_else(|| unreachable!("client already released"))
    }
}

impl<C> Drop for PooledClient<'_, C> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.release(client);
        }
    }
}
