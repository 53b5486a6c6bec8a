//! Request and response log records.
//!
//! A [`RequestLog`] is captured by the HTTP log middleware and stored in the
//! request extensions. Response helpers store a [`ResponseLog`] in the
//! response extensions; the middleware reads it back, adds [`Latency`], and
//! emits the access log.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::panic::Location;
use std::time::Duration;

use axum::body::{Body, HttpBody as _};
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, HeaderName, Request, StatusCode};
use axum::response::Response;
use chrono::{DateTime, SecondsFormat, Utc};

/// Header carrying the request id.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Structured request information captured when the request arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestLog {
    /// When the request was observed, right before the handler runs.
    pub timestamp: DateTime<Utc>,
    pub method: String,
    /// Request URL as received.
    pub url: String,
    /// Declared body size. `None` when unknown.
    pub content_length: Option<u64>,
    /// Protocol version, e.g. `HTTP/1.1`.
    pub proto: String,
    pub host: String,
    /// Peer address as `ip:port`. Empty when the connection info is missing.
    pub remote_addr: String,
    pub user_agent: String,
    /// Path and query as sent by the client.
    pub request_uri: String,
    pub referer: String,
    pub request_id: Option<String>,
}

impl RequestLog {
    /// Capture a request.
    pub fn from_request<B>(request: &Request<B>, timestamp: DateTime<Utc>) -> Self {
        let headers = request.headers();
        let uri = request.uri();

        let host = header_str(headers, &header::HOST)
            .map(str::to_string)
            .or_else(|| uri.authority().map(|authority| authority.to_string()))
            .unwrap_or_default();

        let remote_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default();

        Self {
            timestamp,
            method: request.method().to_string(),
            url: uri.to_string(),
            content_length: header_str(headers, &header::CONTENT_LENGTH)
                .and_then(|value| value.parse().ok()),
            proto: format!("{:?}", request.version()),
            host,
            remote_addr,
            user_agent: header_str(headers, &header::USER_AGENT).unwrap_or_default().to_string(),
            request_uri: uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| uri.path().to_string()),
            referer: header_str(headers, &header::REFERER).unwrap_or_default().to_string(),
            request_id: header_str(headers, &X_REQUEST_ID).map(str::to_string),
        }
    }

    /// Timestamp formatted as RFC 3339.
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Peer IP address, with IPv4-mapped IPv6 addresses reduced to IPv4.
    ///
    /// `None` when `remote_addr` is not a valid `ip:port`.
    pub fn ip(&self) -> Option<IpAddr> {
        self.addr().map(|ip| ip.to_canonical())
    }

    /// Peer IP address exactly as parsed from `remote_addr`.
    pub fn addr(&self) -> Option<IpAddr> {
        self.remote_addr.parse::<SocketAddr>().ok().map(|addr| addr.ip())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Source location of the code that rendered a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerInfo {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl HandlerInfo {
    /// Location of the caller. Propagates through `#[track_caller]` functions.
    #[track_caller]
    pub fn caller() -> Self {
        Self::from(Location::caller())
    }

    /// Placeholder when the location is not available.
    pub fn unknown() -> Self {
        Self {
            file: "unknown",
            line: 0,
            column: 0,
        }
    }
}

impl From<&'static Location<'static>> for HandlerInfo {
    fn from(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for HandlerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Structured response information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLog {
    pub status: StatusCode,
    /// Body size in bytes. `None` when unknown, e.g. streamed bodies.
    pub response_size: Option<u64>,
    /// Cause recorded by the handler, if any.
    pub error: Option<String>,
    pub handler: Option<HandlerInfo>,
}

impl ResponseLog {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            response_size: None,
            error: None,
            handler: None,
        }
    }

    /// Derive a log from a response that did not record one.
    pub fn from_response(response: &Response<Body>) -> Self {
        Self {
            response_size: response.body().size_hint().exact(),
            ..Self::new(response.status())
        }
    }
}

/// Time between the request arriving and the handler returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Latency(pub Duration);
