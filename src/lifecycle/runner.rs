//! Server runner: background accept loop, signal context, graceful shutdown.
//!
//! # Responsibilities
//! - Start the serve capability on a detached task
//! - Hand out a completion context tied to SIGTERM/SIGINT
//! - Route accept-loop failures and panics to callbacks
//! - Drain connections within a caller-supplied timeout
//!
//! # Design Decisions
//! - The expected close after shutdown is never reported as a failure
//! - Panics stay inside the accept-loop task
//! - One run per runner; the state machine only moves forward

use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use thiserror::Error;
use tracing::{Instrument, Span};

use crate::http::HttpServer;
use crate::lifecycle::serve::{Serve, ServeError};
use crate::lifecycle::shutdown::{deadline_from_timeout, LifecycleState, ShutdownError, StateCell};
use crate::lifecycle::signals::{notify_termination, RunContext, SignalGuard};
use crate::observability::metrics;

/// Value carried by a recovered panic.
pub type PanicPayload = Box<dyn Any + Send>;

/// Receives errors that ended the accept loop.
pub type ErrorSink = Arc<dyn Fn(&RunContext, ServeError) + Send + Sync>;

/// Receives panics recovered from the accept-loop task.
pub type PanicSink = Arc<dyn Fn(&RunContext, PanicPayload) + Send + Sync>;

/// Errors returned by [`ServerRunner::run`].
#[derive(Debug, Error)]
pub enum RunnerError {
    /// `run` was already called.
    #[error("server runner is already running")]
    AlreadyStarted,

    /// The runner was shut down; it cannot run again.
    #[error("server runner is stopped and cannot be restarted")]
    AlreadyStopped,

    /// `run` was called outside a Tokio runtime.
    #[error("no Tokio runtime available to run the server")]
    NoRuntime,

    /// Installing the termination signal listeners failed.
    #[error("failed to register signal handlers: {0}")]
    Signal(#[source] io::Error),
}

/// Runs a [`Serve`] implementation with signal handling and graceful shutdown.
///
/// ```no_run
/// # async fn example(router: axum::Router) -> Result<(), Box<dyn std::error::Error>> {
/// use std::time::Duration;
/// use httpkit::{HttpServer, ServerRunner};
///
/// let runner = ServerRunner::builder()
///     .server(HttpServer::new("127.0.0.1:8080", router))
///     .on_error(|_ctx, err| tracing::error!(error = %err, "server failed"))
///     .build();
///
/// let (ctx, signals) = runner.run()?;
/// ctx.done().await;
/// signals.stop();
/// runner.shutdown(Duration::from_secs(10)).await?;
/// # Ok(())
/// # }
/// ```
pub struct ServerRunner<S = HttpServer> {
    server: Arc<S>,
    on_error: ErrorSink,
    on_panic: PanicSink,
    state: StateCell,
}

impl<S: Serve> ServerRunner<S> {
    /// Runner with no-op callbacks.
    pub fn new(server: S) -> Self {
        Self::builder().server(server).build()
    }

    /// Start building a runner.
    pub fn builder() -> RunnerBuilder<S> {
        RunnerBuilder::default()
    }

    /// Bind address of the underlying server.
    pub fn addr(&self) -> &str {
        self.server.addr()
    }

    /// The underlying server.
    pub fn server(&self) -> &S {
        &self.server
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    /// Start the accept loop on a background task.
    ///
    /// Returns a context completed by SIGTERM or SIGINT and a guard that stops
    /// the signal listener. The context is a fresh root: nothing the caller
    /// cancels can complete it. The current span is carried into the task.
    ///
    /// The context does not trigger shutdown on its own; react to it by
    /// calling [`ServerRunner::shutdown`].
    pub fn run(&self) -> Result<(RunContext, SignalGuard), RunnerError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| RunnerError::NoRuntime)?;

        let span = Span::current();
        let (ctx, guard) = notify_termination(span.clone()).map_err(RunnerError::Signal)?;

        self.state
            .transition(LifecycleState::Created, LifecycleState::Running)
            .map_err(|observed| match observed {
                LifecycleState::Running => RunnerError::AlreadyStarted,
                _ => RunnerError::AlreadyStopped,
            })?;

        tracing::info!(address = %self.server.addr(), "Server runner started");

        let server = Arc::clone(&self.server);
        let on_error = Arc::clone(&self.on_error);
        let on_panic = Arc::clone(&self.on_panic);
        let task_ctx = ctx.clone();

        handle.spawn(
            async move {
                let outcome = AssertUnwindSafe(async {
                    match server.listen_and_serve().await {
                        Ok(()) => tracing::debug!("Accept loop returned"),
                        Err(err) if err.is_server_closed() => {
                            tracing::debug!("Accept loop closed by shutdown");
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "Accept loop failed");
                            metrics::record_async_failure("error");
                            on_error(&task_ctx, err);
                        }
                    }
                })
                .catch_unwind()
                .await;

                if let Err(payload) = outcome {
                    tracing::error!(panic = %panic_message(&payload), "Accept loop panicked");
                    metrics::record_async_failure("panic");
                    on_panic(&task_ctx, payload);
                }
            }
            .instrument(span),
        );

        Ok((ctx, guard))
    }

    /// Gracefully shut down the server.
    ///
    /// A zero timeout waits indefinitely for open connections. Otherwise the
    /// deadline starts now and does not depend on anything passed to `run`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        let previous = self.state.advance(LifecycleState::ShuttingDown);
        tracing::info!(
            address = %self.server.addr(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            previous_state = %previous,
            "Graceful shutdown started"
        );

        let result = self.server.shutdown(deadline_from_timeout(timeout)).await;
        self.state.advance(LifecycleState::Stopped);

        match &result {
            Ok(()) => tracing::info!("Graceful shutdown complete"),
            Err(err) => tracing::warn!(error = %err, "Graceful shutdown incomplete"),
        }
        result
    }
}

/// Builder for [`ServerRunner`].
pub struct RunnerBuilder<S> {
    server: Option<S>,
    on_error: Option<ErrorSink>,
    on_panic: Option<PanicSink>,
}

impl<S> Default for RunnerBuilder<S> {
    fn default() -> Self {
        Self {
            server: None,
            on_error: None,
            on_panic: None,
        }
    }
}

impl<S: Serve> RunnerBuilder<S> {
    /// The server to run. Required.
    pub fn server(mut self, server: S) -> Self {
        self.server = Some(server);
        self
    }

    /// Called when the accept loop ends with an error other than the
    /// expected close.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunContext, ServeError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Called with the payload of a panic raised in the accept-loop task,
    /// including panics raised by the error callback.
    pub fn on_panic<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunContext, PanicPayload) + Send + Sync + 'static,
    {
        self.on_panic = Some(Arc::new(f));
        self
    }

    /// Build the runner.
    ///
    /// # Panics
    ///
    /// Panics when no server was supplied.
    pub fn build(self) -> ServerRunner<S> {
        let Some(server) = self.server else {
            panic!("server is required");
        };

        ServerRunner {
            server: Arc::new(server),
            on_error: self.on_error.unwrap_or_else(|| Arc::new(|_, _| {})),
            on_panic: self.on_panic.unwrap_or_else(|| Arc::new(|_, _| {})),
            state: StateCell::new(),
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &PanicPayload) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .or_else(|| payload.downcast_ref::<ServeError>().map(ToString::to_string))
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::{mpsc, Notify};
    use tokio::time::{timeout, Instant};

    const WAIT: Duration = Duration::from_millis(500);

    #[derive(Clone, Copy)]
    enum Behavior {
        FailBind,
        Panic,
        Closed,
        BlockUntilShutdown,
    }

    struct FakeServer {
        behavior: Behavior,
        release: Notify,
        listens: AtomicUsize,
        deadlines: Mutex<Vec<Option<Instant>>>,
    }

    impl FakeServer {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                release: Notify::new(),
                listens: AtomicUsize::new(0),
                deadlines: Mutex::new(Vec::new()),
            }
        }

        fn deadlines(&self) -> Vec<Option<Instant>> {
            self.deadlines.lock().unwrap().clone()
        }
    }

    impl Serve for FakeServer {
        fn addr(&self) -> &str {
            "127.0.0.1:9"
        }

        async fn listen_and_serve(&self) -> Result<(), ServeError> {
            self.listens.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::FailBind => Err(ServeError::Bind {
                    addr: self.addr().to_string(),
                    source: io::Error::from(io::ErrorKind::AddrInUse),
                }),
                Behavior::Panic => panic!("accept loop exploded"),
                Behavior::Closed => Err(ServeError::ServerClosed),
                Behavior::BlockUntilShutdown => {
                    self.release.notified().await;
                    Err(ServeError::ServerClosed)
                }
            }
        }

        async fn shutdown(&self, deadline: Option<Instant>) -> Result<(), ShutdownError> {
            self.deadlines.lock().unwrap().push(deadline);
            self.release.notify_one();
            Ok(())
        }
    }

    fn sinks() -> (
        RunnerBuilder<FakeServer>,
        mpsc::UnboundedReceiver<ServeError>,
        mpsc::UnboundedReceiver<PanicPayload>,
    ) {
        let (err_tx, err_rx) = mpsc::unbounded_channel();
        let (panic_tx, panic_rx) = mpsc::unbounded_channel();
        let builder = ServerRunner::builder()
            .on_error(move |_, err| {
                let _ = err_tx.send(err);
            })
            .on_panic(move |_, payload| {
                let _ = panic_tx.send(payload);
            });
        (builder, err_rx, panic_rx)
    }

    #[test]
    #[should_panic(expected = "server is required")]
    fn build_without_server_panics() {
        let _ = ServerRunner::<FakeServer>::builder().build();
    }

    #[test]
    fn run_outside_runtime_is_rejected() {
        let runner = ServerRunner::new(FakeServer::new(Behavior::Closed));
        assert!(matches!(runner.run(), Err(RunnerError::NoRuntime)));
        assert_eq!(runner.state(), LifecycleState::Created);
    }

    #[tokio::test]
    async fn addr_comes_from_server() {
        let runner = ServerRunner::new(FakeServer::new(Behavior::Closed));
        assert_eq!(runner.addr(), "127.0.0.1:9");
    }

    #[tokio::test]
    async fn bind_failure_reaches_error_sink_only() {
        let (builder, mut err_rx, mut panic_rx) = sinks();
        let runner = builder.server(FakeServer::new(Behavior::FailBind)).build();

        let (_ctx, _signals) = runner.run().unwrap();

        let err = timeout(WAIT, err_rx.recv()).await.unwrap().unwrap();
        assert!(matches!(err, ServeError::Bind { .. }));
        assert!(err.to_string().contains("failed to bind"));
        assert!(panic_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn server_closed_is_not_reported() {
        let (builder, mut err_rx, mut panic_rx) = sinks();
        let runner = builder.server(FakeServer::new(Behavior::Closed)).build();

        let (_ctx, _signals) = runner.run().unwrap();

        assert!(timeout(Duration::from_millis(100), err_rx.recv()).await.is_err());
        assert!(panic_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn panic_reaches_panic_sink() {
        let (builder, _err_rx, mut panic_rx) = sinks();
        let runner = builder.server(FakeServer::new(Behavior::Panic)).build();

        let (_ctx, _signals) = runner.run().unwrap();

        let payload = timeout(WAIT, panic_rx.recv()).await.unwrap().unwrap();
        assert_eq!(panic_message(&payload), "accept loop exploded");
    }

    #[tokio::test]
    async fn panicking_error_sink_reaches_panic_sink() {
        let (panic_tx, mut panic_rx) = mpsc::unbounded_channel();
        let runner = ServerRunner::builder()
            .server(FakeServer::new(Behavior::FailBind))
            .on_error(|_, err| std::panic::panic_any(err))
            .on_panic(move |_, payload| {
                let _ = panic_tx.send(payload);
            })
            .build();

        let (_ctx, _signals) = runner.run().unwrap();

        let payload = timeout(WAIT, panic_rx.recv()).await.unwrap().unwrap();
        let err = payload.downcast::<ServeError>().unwrap();
        assert!(matches!(*err, ServeError::Bind { .. }));
    }

    #[tokio::test]
    async fn missing_callbacks_are_no_ops() {
        for behavior in [Behavior::FailBind, Behavior::Panic] {
            let runner = ServerRunner::new(FakeServer::new(behavior));
            let (_ctx, _signals) = runner.run().unwrap();

            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(runner.server().listens.load(Ordering::SeqCst), 1);
            assert_eq!(runner.state(), LifecycleState::Running);
        }
    }

    #[tokio::test]
    async fn zero_timeout_passes_no_deadline() {
        let runner = ServerRunner::new(FakeServer::new(Behavior::BlockUntilShutdown));
        let (_ctx, signals) = runner.run().unwrap();

        runner.shutdown(Duration::ZERO).await.unwrap();
        signals.stop();

        assert_eq!(runner.server().deadlines(), vec![None]);
        assert_eq!(runner.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn huge_timeout_waits_without_deadline() {
        let runner = ServerRunner::new(FakeServer::new(Behavior::BlockUntilShutdown));
        let (_ctx, _signals) = runner.run().unwrap();

        runner.shutdown(Duration::MAX).await.unwrap();

        assert_eq!(runner.server().deadlines(), vec![None]);
        assert_eq!(runner.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn positive_timeout_passes_fresh_deadline() {
        let runner = ServerRunner::new(FakeServer::new(Behavior::BlockUntilShutdown));
        let (_ctx, _signals) = runner.run().unwrap();

        let before = Instant::now();
        runner.shutdown(Duration::from_secs(3)).await.unwrap();

        let deadlines = runner.server().deadlines();
        assert_eq!(deadlines.len(), 1);
        let deadline = deadlines[0].unwrap();
        assert!(deadline >= before + Duration::from_secs(3));
    }

    #[tokio::test]
    async fn second_run_is_rejected() {
        let runner = ServerRunner::new(FakeServer::new(Behavior::BlockUntilShutdown));
        let (_ctx, _signals) = runner.run().unwrap();

        assert!(matches!(runner.run(), Err(RunnerError::AlreadyStarted)));

        runner.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(runner.run(), Err(RunnerError::AlreadyStopped)));
        assert_eq!(runner.server().listens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_after_shutdown_without_start_is_rejected() {
        let runner = ServerRunner::new(FakeServer::new(Behavior::Closed));
        runner.shutdown(Duration::ZERO).await.unwrap();

        assert_eq!(runner.state(), LifecycleState::Stopped);
        assert!(matches!(runner.run(), Err(RunnerError::AlreadyStopped)));
    }

    #[tokio::test]
    async fn context_is_independent_of_stop() {
        let runner = ServerRunner::new(FakeServer::new(Behavior::BlockUntilShutdown));
        let (ctx, signals) = runner.run().unwrap();

        signals.stop();
        signals.stop();
        assert!(!ctx.is_done());

        runner.shutdown(Duration::ZERO).await.unwrap();
        assert!(!ctx.is_done());
    }

    #[test]
    fn panic_message_formats_known_payloads() {
        let payload: PanicPayload = Box::new("static");
        assert_eq!(panic_message(&payload), "static");

        let payload: PanicPayload = Box::new(String::from("owned"));
        assert_eq!(panic_message(&payload), "owned");

        let payload: PanicPayload = Box::new(ServeError::ServerClosed);
        assert_eq!(panic_message(&payload), "server closed");

        let payload: PanicPayload = Box::new(42_u8);
        assert_eq!(panic_message(&payload), "unknown panic");
    }
}
