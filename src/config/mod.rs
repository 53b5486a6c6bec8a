//! Server configuration.
//!
//! ```text
//! TOML file
//!     → loader.rs (read + deserialize, unknown fields rejected)
//!     → validation.rs (every semantic error collected)
//!     → ServerConfig
//!         → HttpServer::from_config (listener, request limit)
//!         → init_tracing / init_metrics (observability)
//!         → ServerRunner::shutdown (shutdown.timeout())
//! ```
//!
//! Every field has a default, so an empty file is valid.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ListenerConfig, LogFormat, ObservabilityConfig, RequestConfig, ServerConfig, ShutdownConfig,
};
pub use validation::{validate_config, ValidationError};
