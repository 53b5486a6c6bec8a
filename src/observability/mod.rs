//! Logs and metrics.
//!
//! ```text
//! logging.rs
//!     init_tracing → stderr, pretty or JSON lines, RUST_LOG wins
//!     http_log     → `http_request` span + one access event per request
//! metrics.rs
//!     requests, latency, open connections, runner failures → Prometheus
//! ```
//!
//! Without `init_tracing` or `init_metrics` every call is a no-op.

pub mod logging;
pub mod metrics;
