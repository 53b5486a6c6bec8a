//! HTTP helpers and server.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper-util auto connection, request ID, body limit)
//!     → observability::logging (http_log middleware, RequestLog + span)
//!     → handler
//!         → request.rs (JSON body decoding)
//!         → response.rs (render status + body, record ResponseLog)
//!     → access log (log.rs records + Latency)
//!     → Send to client
//! ```

pub mod log;
pub mod request;
pub mod response;
pub mod server;

pub use log::{HandlerInfo, Latency, RequestLog, ResponseLog, X_REQUEST_ID};
pub use request::{decode_json_body, DecodeError, JsonBody, RequestBodyLimit};
pub use response::ResponseBody;
pub use server::HttpServer;
