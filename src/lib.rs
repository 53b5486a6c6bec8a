//! HTTP server helpers with graceful lifecycle management.
//!
//! - [`ServerRunner`] runs a [`Serve`] implementation in the background, turns
//!   SIGTERM/SIGINT into a [`RunContext`], and drains connections on shutdown.
//! - [`HttpServer`] serves an Axum router over HTTP/1.1 and HTTP/2.
//! - [`http::response`] and [`http::request`] render responses and decode
//!   JSON bodies, recording structured logs along the way.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;

pub use config::schema::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::{RunContext, Serve, ServerRunner, SignalGuard};
