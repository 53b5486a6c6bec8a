//! HTTP server implementing [`Serve`] for an Axum router.
//!
//! # Responsibilities
//! - Wire up the standard middleware (request ID, HTTP log, body limit)
//! - Bind the bounded listener and run the accept loop
//! - Serve each connection over HTTP/1.1 or HTTP/2 on its own task
//! - Drain connections on shutdown, force-close them past the deadline

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::{middleware, Extension, Router};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tower::ServiceExt;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::http::request::{RequestBodyLimit, DEFAULT_MAX_REQUEST_BODY_SIZE};
use crate::lifecycle::{Serve, ServeError, ShutdownError};
use crate::net::connection::{ConnectionState, ConnectionTracker};
use crate::net::listener::{
    clamp_max_connections, is_connection_error, ConnectionPermit, Listener, ListenerError,
};
use crate::observability::logging::http_log;
use crate::resilience::backoff::calculate_backoff;

/// Default connection limit.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

const ACCEPT_BACKOFF_BASE_MS: u64 = 5;
const ACCEPT_BACKOFF_MAX_MS: u64 = 1_000;

/// HTTP server for an Axum router.
pub struct HttpServer {
    addr: String,
    router: Router,
    max_connections: usize,
    connections: ConnectionTracker,
}

impl HttpServer {
    /// Create a server for `router` on `addr` with default limits.
    pub fn new(addr: impl Into<String>, router: Router) -> Self {
        Self::build(addr.into(), router, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_REQUEST_BODY_SIZE)
    }

    /// Create a server from configuration.
    pub fn from_config(config: &ServerConfig, router: Router) -> Self {
        Self::build(
            config.listener.bind_address.clone(),
            router,
            config.listener.max_connections,
            config.request.max_body_bytes,
        )
    }

    /// Limit concurrent connections. Extra connections wait in the backlog.
    ///
    /// The limit is clamped to `1..=Semaphore::MAX_PERMITS`.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = clamp_max_connections(max_connections);
        self
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    fn build(addr: String, router: Router, max_connections: usize, max_body_bytes: usize) -> Self {
        let router = router
            .layer(middleware::from_fn(http_log))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(Extension(RequestBodyLimit(max_body_bytes)));

        Self {
            addr,
            router,
            max_connections: clamp_max_connections(max_connections),
            connections: ConnectionTracker::new(),
        }
    }

    /// Connection tracker shared with the connection tasks.
    pub fn connections(&self) -> &ConnectionTracker {
        &self.connections
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let guard = self.connections.track();
        let tracker = self.connections.clone();
        let router = self.router.clone();
        let span = tracing::debug_span!("connection", connection_id = %guard.id(), peer_addr = %peer);

        tokio::spawn(
            async move {
                let _permit = permit;
                let _guard = guard;

                let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
                    request.extensions_mut().insert(ConnectInfo(peer));
                    router.clone().oneshot(request)
                });

                let builder = auto::Builder::new(TokioExecutor::new());
                let conn = builder.serve_connection(TokioIo::new(stream), service);
                tokio::pin!(conn);

                let mut state = ConnectionState::Active;
                loop {
                    tokio::select! {
                        result = conn.as_mut() => {
                            if let Err(err) = result {
                                tracing::debug!(error = %err, "Connection ended with error");
                            }
                            break;
                        }
                        _ = tracker.closing(), if state == ConnectionState::Active => {
                            state = ConnectionState::Draining;
                            conn.as_mut().graceful_shutdown();
                        }
                        _ = tracker.force_closed() => {
                            tracing::warn!("Connection force-closed after shutdown deadline");
                            break;
                        }
                    }
                }

                state = ConnectionState::Closed;
                tracing::trace!(?state, "Connection task finished");
            }
            .instrument(span),
        );
    }
}

impl Serve for HttpServer {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn listen_and_serve(&self) -> Result<(), ServeError> {
        // Tracked before the closing check, so a concurrent shutdown either
        // stops this bind or waits for the listener to close.
        let listener_token = self.connections.track_listener();
        if self.connections.is_closing() {
            return Err(ServeError::ServerClosed);
        }

        let listener = Listener::bind(&self.addr, self.max_connections)
            .await
            .map_err(|err| match err {
                ListenerError::Bind(source) | ListenerError::Accept(source) => ServeError::Bind {
                    addr: self.addr.clone(),
                    source,
                },
            })?;

        tracing::info!(address = %self.addr, "HTTP server accepting connections");

        let mut failures = 0u32;
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.connections.closing() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer, permit)) => {
                    failures = 0;
                    self.spawn_connection(stream, peer, permit);
                }
                Err(ListenerError::Accept(err)) if is_connection_error(&err) => {
                    tracing::debug!(error = %err, "Skipping failed connection");
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    let delay = calculate_backoff(failures, ACCEPT_BACKOFF_BASE_MS, ACCEPT_BACKOFF_MAX_MS);
                    tracing::error!(error = %err, retry_in = ?delay, "Accept failed");

                    tokio::select! {
                        biased;
                        _ = self.connections.closing() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        drop(listener);
        drop(listener_token);
        tracing::info!(address = %self.addr, "Listener closed");
        Err(ServeError::ServerClosed)
    }

    async fn shutdown(&self, deadline: Option<Instant>) -> Result<(), ShutdownError> {
        tracing::info!(
            address = %self.addr,
            active_connections = self.connections.active_count(),
            "Draining HTTP server"
        );
        self.connections.begin_shutdown();
        self.connections.wait_for_shutdown(deadline).await
    }
}
