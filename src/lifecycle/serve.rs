//! The serve capability driven by [`ServerRunner`](super::ServerRunner).

use std::future::Future;
use std::io;

use thiserror::Error;
use tokio::time::Instant;

use crate::lifecycle::shutdown::ShutdownError;

/// Errors that end an accept loop.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The server was shut down. Expected after a graceful shutdown.
    #[error("server closed")]
    ServerClosed,

    /// Failed to bind the listen address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl ServeError {
    /// Returns true for the expected close after shutdown.
    pub fn is_server_closed(&self) -> bool {
        matches!(self, ServeError::ServerClosed)
    }
}

/// Something that can listen, serve, and shut down gracefully.
///
/// `listen_and_serve` and `shutdown` are called concurrently from different
/// tasks, so implementations must be safe for that pairing.
pub trait Serve: Send + Sync + 'static {
    /// Configured bind address.
    fn addr(&self) -> &str;

    /// Bind and accept connections until shut down or failed.
    ///
    /// Returns [`ServeError::ServerClosed`] once shutdown has begun.
    fn listen_and_serve(&self) -> impl Future<Output = Result<(), ServeError>> + Send;

    /// Stop accepting, then wait for open connections to finish.
    ///
    /// With a deadline, returns [`ShutdownError::DeadlineExceeded`] when it
    /// elapses first.
    fn shutdown(
        &self,
        deadline: Option<Instant>,
    ) -> impl Future<Output = Result<(), ShutdownError>> + Send;
}
