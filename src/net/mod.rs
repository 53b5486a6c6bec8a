//! TCP plumbing under the HTTP server.
//!
//! ```text
//! Listener::accept (semaphore permit first, then the socket)
//!     → ConnectionTracker::track (ConnectionId, active gauge, task token)
//!     → http::server connection task
//!
//! Shutdown:
//!     begin_shutdown → accept loop exits, connections go Active → Draining
//!     wait_for_shutdown → every token dropped (Closed), or force-close at deadline
//! ```

pub mod connection;
pub mod listener;
