//! Response rendering helpers.
//!
//! Each helper builds the response and records a [`ResponseLog`] in its
//! extensions, pointing at the handler that called the helper.
//!
//! ```
//! use axum::response::Response;
//! use httpkit::http::response::{self, ResponseBody};
//!
//! async fn get_item() -> Response {
//!     match ResponseBody::json(&serde_json::json!({ "id": 1 })) {
//!         Ok(body) => response::ok_with_body(body),
//!         Err(err) => response::internal_server_error(err),
//!     }
//! }
//! ```

use std::fmt;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use serde::Serialize;

use crate::http::log::{HandlerInfo, ResponseLog};

/// `text/plain`
pub const TEXT_PLAIN: &str = "text/plain";
/// `application/json`
pub const JSON: &str = "application/json";
/// `application/json; charset=utf-8`
pub const JSON_UTF8: &str = "application/json; charset=utf-8";
/// `application/octet-stream`
pub const OCTET_STREAM: &str = "application/octet-stream";

/// A fully encoded response body and its content type.
#[derive(Debug, Clone)]
pub struct ResponseBody {
    bytes: Bytes,
    content_type: HeaderValue,
}

impl ResponseBody {
    /// Encode `value` as JSON (`application/json; charset=utf-8`).
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self {
            bytes: Bytes::from(bytes),
            content_type: HeaderValue::from_static(JSON_UTF8),
        })
    }

    /// Raw bytes as `application/octet-stream`.
    pub fn raw(bytes: impl Into<Bytes>) -> Self {
        Self::raw_with_content_type(bytes, OCTET_STREAM)
    }

    /// Raw bytes with an explicit content type.
    pub fn raw_with_content_type(bytes: impl Into<Bytes>, content_type: &'static str) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: HeaderValue::from_static(content_type),
        }
    }

    pub fn content_type(&self) -> &HeaderValue {
        &self.content_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Render `status` with an optional body and cause.
///
/// The cause only goes to the [`ResponseLog`]; it is never sent to the client.
#[track_caller]
pub fn render(status: StatusCode, body: Option<ResponseBody>, cause: Option<&dyn fmt::Display>) -> Response {
    let mut log = ResponseLog::new(status);
    log.handler = Some(HandlerInfo::caller());
    log.error = cause.map(ToString::to_string);

    let mut response = match body {
        Some(body) => {
            log.response_size = Some(body.len() as u64);
            let mut response = Response::new(Body::from(body.bytes));
            response.headers_mut().insert(header::CONTENT_TYPE, body.content_type);
            response
        }
        None => {
            log.response_size = Some(0);
            Response::new(Body::empty())
        }
    };

    *response.status_mut() = status;
    response.extensions_mut().insert(log);
    response
}

/// 200 without body.
#[track_caller]
pub fn ok() -> Response {
    render(StatusCode::OK, None, None)
}

/// 200 with body.
#[track_caller]
pub fn ok_with_body(body: ResponseBody) -> Response {
    render(StatusCode::OK, Some(body), None)
}

/// 201 without body.
#[track_caller]
pub fn created() -> Response {
    render(StatusCode::CREATED, None, None)
}

/// 201 with body.
#[track_caller]
pub fn created_with_body(body: ResponseBody) -> Response {
    render(StatusCode::CREATED, Some(body), None)
}

/// 204.
#[track_caller]
pub fn no_content() -> Response {
    render(StatusCode::NO_CONTENT, None, None)
}

/// 204 for a failed authentication. The cause is logged.
#[track_caller]
pub fn no_content_for_unauthorized(cause: impl fmt::Display) -> Response {
    render(StatusCode::NO_CONTENT, None, Some(&cause))
}

/// 307 to `url`.
#[track_caller]
pub fn redirect(url: &str) -> Response {
    let handler = HandlerInfo::caller();
    let mut response = Redirect::temporary(url).into_response();

    let mut log = ResponseLog::from_response(&response);
    log.handler = Some(handler);
    response.extensions_mut().insert(log);
    response
}

/// 400 without body.
#[track_caller]
pub fn bad_request(cause: impl fmt::Display) -> Response {
    render(StatusCode::BAD_REQUEST, None, Some(&cause))
}

/// 400 with body.
#[track_caller]
pub fn bad_request_with_body(body: ResponseBody, cause: impl fmt::Display) -> Response {
    render(StatusCode::BAD_REQUEST, Some(body), Some(&cause))
}

/// 401.
#[track_caller]
pub fn unauthorized(cause: impl fmt::Display) -> Response {
    render(StatusCode::UNAUTHORIZED, None, Some(&cause))
}

/// 403.
#[track_caller]
pub fn forbidden(cause: impl fmt::Display) -> Response {
    render(StatusCode::FORBIDDEN, None, Some(&cause))
}

/// 404.
#[track_caller]
pub fn not_found(cause: impl fmt::Display) -> Response {
    render(StatusCode::NOT_FOUND, None, Some(&cause))
}

/// 409.
#[track_caller]
pub fn conflict(cause: impl fmt::Display) -> Response {
    render(StatusCode::CONFLICT, None, Some(&cause))
}

/// 500.
#[track_caller]
pub fn internal_server_error(cause: impl fmt::Display) -> Response {
    render(StatusCode::INTERNAL_SERVER_ERROR, None, Some(&cause))
}
