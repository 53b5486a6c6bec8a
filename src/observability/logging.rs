//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber (pretty or JSON, stderr)
//! - Run every request inside an `http_request` span
//! - Emit one access-log event per request
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the configured level
//! - Access-log level follows the status: info, warn for 4xx, error for 5xx

use std::time::Instant;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use tracing::{Instrument, Level};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};
use crate::http::log::{Latency, RequestLog, ResponseLog};
use crate::observability::metrics;

/// Install the global subscriber.
///
/// Fails when a global subscriber is already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "httpkit={level},tower_http={level}",
            level = config.log_level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    }
}

/// Level of the access-log event for `status`.
pub fn access_log_level(status: StatusCode) -> Level {
    if status.is_server_error() {
        Level::ERROR
    } else if status.is_client_error() {
        Level::WARN
    } else {
        Level::INFO
    }
}

macro_rules! access_event {
    ($level:expr, $request:expr, $response:expr, $latency:expr) => {
        tracing::event!(
            $level,
            http_request.timestamp = %$request.timestamp_rfc3339(),
            http_request.method = %$request.method,
            http_request.url = %$request.url,
            http_request.proto = %$request.proto,
            http_request.host = %$request.host,
            http_request.remote_addr = %$request.remote_addr,
            http_request.user_agent = %$request.user_agent,
            http_request.request_uri = %$request.request_uri,
            http_request.referer = %$request.referer,
            http_request.content_length = $request.content_length,
            http_request.request_id = $request.request_id.as_deref(),
            http_response.status = $response.status.as_u16(),
            http_response.size = $response.response_size,
            http_response.error = $response.error.as_deref(),
            http_response.handler = $response.handler.as_ref().map(tracing::field::display),
            http_response.latency_ms = $latency.as_secs_f64() * 1000.0,
            "HTTP request served"
        )
    };
}

/// Middleware recording a [`RequestLog`], a [`Latency`] and the access log.
///
/// Handlers can read the [`RequestLog`] from the request extensions. Events
/// they log carry the `http_request` span fields.
pub async fn http_log(mut request: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_log = RequestLog::from_request(&request, Utc::now());

    let span = tracing::info_span!(
        "http_request",
        method = %request_log.method,
        uri = %request_log.request_uri,
        remote_addr = %request_log.remote_addr,
        request_id = request_log.request_id.as_deref(),
    );

    request.extensions_mut().insert(request_log.clone());
    let mut response = next.run(request).instrument(span.clone()).await;

    let latency = start.elapsed();
    response.extensions_mut().insert(Latency(latency));

    let response_log = response
        .extensions()
        .get::<ResponseLog>()
        .cloned()
        .unwrap_or_else(|| ResponseLog::from_response(&response));

    let level = access_log_level(response_log.status);
    span.in_scope(|| {
        if level == Level::ERROR {
            access_event!(Level::ERROR, request_log, response_log, latency);
        } else if level == Level::WARN {
            access_event!(Level::WARN, request_log, response_log, latency);
        } else {
            access_event!(Level::INFO, request_log, response_log, latency);
        }
    });

    metrics::record_request(&request_log.method, response_log.status.as_u16(), start);
    response
}
