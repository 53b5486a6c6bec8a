//! Shutdown deadlines and the lifecycle state machine.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Errors returned by a graceful shutdown.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    /// Connections were still open when the deadline elapsed.
    #[error("shutdown deadline exceeded with {remaining} connection(s) still open")]
    DeadlineExceeded { remaining: usize },
}

impl ShutdownError {
    /// Returns true for [`ShutdownError::DeadlineExceeded`].
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, ShutdownError::DeadlineExceeded { .. })
    }
}

/// Deadline for a shutdown started now.
///
/// A zero timeout means no deadline. So does a timeout too large to be
/// represented as an [`Instant`].
pub fn deadline_from_timeout(timeout: Duration) -> Option<Instant> {
    if timeout.is_zero() {
        return None;
    }
    Instant::now().checked_add(timeout)
}

/// Convert a signed millisecond timeout to a [`Duration`].
///
/// Values `<= 0` map to zero, i.e. wait indefinitely.
pub fn timeout_from_millis(timeout_ms: i64) -> Duration {
    u64::try_from(timeout_ms)
        .map(Duration::from_millis)
        .unwrap_or(Duration::ZERO)
}

/// Lifecycle of one server run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// Constructed, not yet running.
    Created = 0,
    /// Accept loop running.
    Running = 1,
    /// Shutdown requested, draining connections.
    ShuttingDown = 2,
    /// Drained, or the shutdown deadline elapsed.
    Stopped = 3,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Created,
            1 => LifecycleState::Running,
            2 => LifecycleState::ShuttingDown,
            _ => LifecycleState::Stopped,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Atomic holder for a [`LifecycleState`].
///
/// States only move forward.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(LifecycleState::Created as u8))
    }

    pub(crate) fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move from `from` to `to`. Returns the observed state on failure.
    pub(crate) fn transition(
        &self,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Result<(), LifecycleState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(LifecycleState::from_u8)
    }

    /// Advance to `to` unless already at or past it. Returns the previous state.
    pub(crate) fn advance(&self, to: LifecycleState) -> LifecycleState {
        LifecycleState::from_u8(self.0.fetch_max(to as u8, Ordering::SeqCst))
    }
}
