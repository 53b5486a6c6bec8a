//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track connection state (Active → Draining → Closed)
//! - Generate unique connection IDs for tracing
//! - Coordinate graceful shutdown per-connection
//! - Wait for every connection (and the accept loop) before shutdown returns

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;

use crate::lifecycle::ShutdownError;
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

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is active and processing requests.
    Active,
    /// Connection is draining (no new requests, finishing in-flight).
    Draining,
    /// Connection is closed.
    Closed,
}

/// Tracks the accept loop and open connections for graceful shutdown.
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
    tasks: TaskTracker,
    closing: CancellationToken,
    force_close: CancellationToken,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            tasks: TaskTracker::new(),
            closing: CancellationToken::new(),
            force_close: CancellationToken::new(),
        }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_connections(active);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            _task: self.tasks.token(),
            id: ConnectionId::new(),
        }
    }

    /// Hold shutdown open while the accept loop owns its listener.
    pub fn track_listener(&self) -> TaskTrackerToken {
        self.tasks.token()
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Stop accepting; ask open connections to drain.
    pub fn begin_shutdown(&self) {
        self.closing.cancel();
        self.tasks.close();
    }

    /// Returns true once shutdown has begun.
    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Resolves when shutdown begins.
    pub fn closing(&self) -> WaitForCancellationFuture<'_> {
        self.closing.cancelled()
    }

    /// Resolves when remaining connections must be dropped.
    pub fn force_closed(&self) -> WaitForCancellationFuture<'_> {
        self.force_close.cancelled()
    }

    /// Wait until the accept loop and every connection are gone.
    ///
    /// When `deadline` passes first, remaining connections are told to close
    /// and [`ShutdownError::DeadlineExceeded`] is returned.
    pub async fn wait_for_shutdown(&self, deadline: Option<Instant>) -> Result<(), ShutdownError> {
        let Some(deadline) = deadline else {
            self.tasks.wait().await;
            return Ok(());
        };

        match tokio::time::timeout_at(deadline, self.tasks.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let remaining = usize::try_from(self.active_count()).unwrap_or(usize::MAX);
                tracing::warn!(remaining, "Shutdown deadline exceeded, closing remaining connections");
                self.force_close.cancel();
                Err(ShutdownError::DeadlineExceeded { remaining })
            }
        }
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    _task: TaskTrackerToken,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let active = self.active_count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_active_connections(active);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_waits_for_connections() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();
        tracker.begin_shutdown();
        assert!(tracker.is_closing());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        tracker.wait_for_shutdown(None).await.unwrap();
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_waits_for_listener() {
        let tracker = ConnectionTracker::new();
        let listener = tracker.track_listener();
        tracker.begin_shutdown();

        let waiter = tracker.clone();
        let wait = tokio::spawn(async move { waiter.wait_for_shutdown(None).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!wait.is_finished());

        drop(listener);
        wait.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn deadline_forces_close() {
        let tracker = ConnectionTracker::new();
        let _guard = tracker.track();
        tracker.begin_shutdown();

        let deadline = Instant::now() + Duration::from_millis(20);
        let err = tracker.wait_for_shutdown(Some(deadline)).await.unwrap_err();

        assert_eq!(err, ShutdownError::DeadlineExceeded { remaining: 1 });
        tracker.force_closed().await;
    }

    #[tokio::test]
    async fn shutdown_without_connections_returns_at_once() {
        let tracker = ConnectionTracker::new();
        tracker.begin_shutdown();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(tracker.wait_for_shutdown(Some(deadline)).await.is_ok());
    }
}
