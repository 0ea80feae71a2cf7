//! Connection lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count live inbound connections and tunnels
//! - Broadcast the drain signal and let shutdown wait for the count to hit zero

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What a guard is keeping alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedKind {
    /// An inbound HTTP connection.
    Connection,
    /// A CONNECT tunnel whose relay outlives its HTTP exchange.
    Tunnel,
}

#[derive(Debug)]
struct TrackerInner {
    active: watch::Sender<u64>,
    draining: watch::Sender<bool>,
}

/// Tracks live connections and tunnels for graceful shutdown.
///
/// Cheap to clone; all clones share the same counters.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                active: watch::Sender::new(0),
                draining: watch::Sender::new(false),
            }),
        }
    }

    /// Record a live connection or tunnel. The returned guard un-records it on drop.
    pub fn track(&self, kind: TrackedKind) -> ConnectionGuard {
        self.inner.active.send_modify(|n| *n += 1);
        match kind {
            TrackedKind::Connection => metrics::connection_opened(),
            TrackedKind::Tunnel => metrics::tunnel_opened(),
        }
        ConnectionGuard {
            inner: Arc::clone(&self.inner),
            kind,
            id: ConnectionId::new(),
        }
    }

    /// Current number of live connections and tunnels.
    pub fn active_count(&self) -> u64 {
        *self.inner.active.borrow()
    }

    /// Ask every connection to finish its in-flight request and close.
    pub fn begin_drain(&self) {
        self.inner.draining.send_replace(true);
    }

    /// Receiver that flips to `true` once [`begin_drain`](Self::begin_drain) is called.
    pub fn drain_signal(&self) -> watch::Receiver<bool> {
        self.inner.draining.subscribe()
    }

    /// Wait until nothing is tracked, or until `grace` elapses.
    ///
    /// Returns `true` if everything drained in time.
    pub async fn wait_for_drain(&self, grace: Duration) -> bool {
        let mut active = self.inner.active.subscribe();
        let drained = matches!(
            tokio::time::timeout(grace, active.wait_for(|n| *n == 0)).await,
            Ok(Ok(_))
        );
        drained
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's or tunnel's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    inner: Arc<TrackerInner>,
    kind: TrackedKind,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.inner.active.send_modify(|n| *n -= 1);
        match self.kind {
            TrackedKind::Connection => metrics::connection_closed(),
            TrackedKind::Tunnel => metrics::tunnel_closed(),
        }
        tracing::trace!(connection_id = %self.id, kind = ?self.kind, "Tracking ended");
    }
}
