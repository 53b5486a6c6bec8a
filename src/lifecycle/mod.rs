//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Run (runner.rs):
//!     Register signals → Spawn accept loop → Return context + guard
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Complete the run context
//!
//! Shutdown (shutdown.rs):
//!     Caller reacts to context → Stop accepting → Drain connections → Stopped
//! ```
//!
//! # Design Decisions
//! - Signal reception and draining are decoupled; the caller picks the timeout
//! - Accept-loop failures and panics go to callbacks, never to the process
//! - Shutdown has a timeout: remaining connections are closed after the deadline

pub mod runner;
pub mod serve;
pub mod shutdown;
pub mod signals;

pub use runner::{panic_message, ErrorSink, PanicPayload, PanicSink, RunnerBuilder, RunnerError, ServerRunner};
pub use serve::{Serve, ServeError};
pub use shutdown::{LifecycleState, ShutdownError};
pub use signals::{RunContext, SignalGuard, TerminationSignal};
