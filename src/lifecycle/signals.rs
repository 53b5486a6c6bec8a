//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGTERM and SIGINT listeners for one server run
//! - Translate the first delivered signal into a cancelled [`RunContext`]
//! - Release the registration when the [`SignalGuard`] is stopped or dropped
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - The context is a fresh root token, never a child of a caller token
//! - Signals only mark the context done; draining is the caller's call
//!
//! Tokio cannot uninstall its process-wide handler, so a released registration
//! applies the default disposition itself: once no registration is active, the
//! next SIGTERM or SIGINT exits the process with `128 + signo`. A second
//! Ctrl-C during a long drain therefore still terminates the process.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{Instrument, Span};

/// The signal that completed a [`RunContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// SIGTERM.
    Terminate,
    /// SIGINT / Ctrl-C.
    Interrupt,
}

impl TerminationSignal {
    /// Signal number.
    pub fn number(self) -> i32 {
        match self {
            TerminationSignal::Terminate => 15,
            TerminationSignal::Interrupt => 2,
        }
    }

    /// Exit status of a process terminated by this signal.
    pub fn exit_code(self) -> i32 {
        128 + self.number()
    }
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Terminate => write!(f, "terminated"),
            TerminationSignal::Interrupt => write!(f, "interrupt"),
        }
    }
}

/// Completion context of one server run.
///
/// Done once a termination signal has been received. Cloning shares the same
/// underlying state.
#[derive(Debug, Clone)]
pub struct RunContext {
    token: CancellationToken,
    cause: Arc<OnceLock<TerminationSignal>>,
    span: Span,
}

impl RunContext {
    fn new(span: Span) -> Self {
        Self {
            token: CancellationToken::new(),
            cause: Arc::new(OnceLock::new()),
            span,
        }
    }

    /// Returns true once a termination signal was received.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until a termination signal is received.
    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// The signal that completed this context, if any.
    pub fn cause(&self) -> Option<TerminationSignal> {
        self.cause.get().copied()
    }

    /// The span that was current when the run started.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// A token that is cancelled together with this context.
    ///
    /// Useful to hand to background tasks that should wind down on signal.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn complete(&self, signal: TerminationSignal) {
        let _ = self.cause.set(signal);
        self.token.cancel();
    }
}

/// Registrations that have not been stopped yet, process-wide.
static ACTIVE_REGISTRATIONS: AtomicUsize = AtomicUsize::new(0);

/// Number of [`SignalGuard`]s that still route signals to their context.
pub fn active_registrations() -> usize {
    ACTIVE_REGISTRATIONS.load(Ordering::SeqCst)
}

/// Scoped registration of the termination signal listener.
///
/// `stop` releases the listener without completing the context. Dropping the
/// guard stops it as well.
#[derive(Debug)]
pub struct SignalGuard {
    stop: CancellationToken,
    released: AtomicBool,
}

impl SignalGuard {
    fn new(stop: CancellationToken) -> Self {
        ACTIVE_REGISTRATIONS.fetch_add(1, Ordering::SeqCst);
        Self {
            stop,
            released: AtomicBool::new(false),
        }
    }

    /// Stop routing termination signals to the context. Safe to call repeatedly.
    ///
    /// Once every registration is stopped, the next termination signal exits
    /// the process.
    pub fn stop(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        ACTIVE_REGISTRATIONS.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!("Signal notifications stopped");
        self.stop.cancel();
    }

    /// Returns true once `stop` was called.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Create a [`RunContext`] completed by SIGTERM or SIGINT.
///
/// Registration happens before this returns, so a signal delivered right
/// afterwards is not lost. Must be called inside a Tokio runtime.
pub fn notify_termination(span: Span) -> io::Result<(RunContext, SignalGuard)> {
    let mut signals = TerminationSignals::register()?;
    let ctx = RunContext::new(span.clone());
    let stop = CancellationToken::new();

    let listener_ctx = ctx.clone();
    let listener_stop = stop.clone();
    tokio::spawn(
        async move {
            tokio::select! {
                _ = listener_stop.cancelled() => {}
                received = signals.recv() => {
                    if let Some(signal) = received {
                        tracing::info!(signal = %signal, "Shutdown signal received");
                        listener_ctx.complete(signal);
                    }
                    listener_stop.cancelled().await;
                }
            }
            exit_on_signal(signals).await;
        }
        .instrument(span),
    );

    Ok((ctx, SignalGuard::new(stop)))
}

/// Default disposition for a released registration.
///
/// Signals arriving while another run is still registered belong to that run.
async fn exit_on_signal(mut signals: TerminationSignals) {
    while let Some(signal) = signals.recv().await {
        if active_registrations() > 0 {
            continue;
        }
        tracing::warn!(
            signal = %signal,
            exit_code = signal.exit_code(),
            "Termination signal received after stop, exiting"
        );
        std::process::exit(signal.exit_code());
    }
}

#[cfg(unix)]
struct TerminationSignals {
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    fn register() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    async fn recv(&mut self) -> Option<TerminationSignal> {
        tokio::select! {
            Some(()) = self.terminate.recv() => Some(TerminationSignal::Terminate),
            Some(()) = self.interrupt.recv() => Some(TerminationSignal::Interrupt),
            else => None,
        }
    }
}

#[cfg(not(unix))]
struct TerminationSignals {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(not(unix))]
impl TerminationSignals {
    fn register() -> io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    async fn recv(&mut self) -> Option<TerminationSignal> {
        self.ctrl_c.recv().await.map(|()| TerminationSignal::Interrupt)
    }
}
