//! Request body decoding.
//!
//! Bodies are read up to a byte limit and decoded with `serde_json`.
//!
//! Unknown fields are a property of the target type, not of the decoder:
//! types with `#[serde(deny_unknown_fields)]` reject them, other types ignore
//! them. Every request type in this crate opts in.

use axum::body::Body;
use axum::extract::{FromRequest, Request};
use axum::response::Response;
use axum::BoxError;
use http_body_util::LengthLimitError;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::http::response;

/// Default request body limit (1 MiB).
pub const DEFAULT_MAX_REQUEST_BODY_SIZE: usize = 1 << 20;

/// Error type for body decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Body is larger than the limit.
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },
    /// Body could not be read.
    #[error("failed to read request body: {0}")]
    Read(#[source] BoxError),
    /// Body is not valid JSON for the target type.
    #[error("failed to decode request body: {0}")]
    Json(#[from] serde_json::Error),
}

impl DecodeError {
    pub fn is_too_large(&self) -> bool {
        matches!(self, Self::TooLarge { .. })
    }
}

/// Body limit applied by [`JsonBody`], stored as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestBodyLimit(pub usize);

impl Default for RequestBodyLimit {
    fn default() -> Self {
        Self(DEFAULT_MAX_REQUEST_BODY_SIZE)
    }
}

/// Decode a JSON body of at most [`DEFAULT_MAX_REQUEST_BODY_SIZE`] bytes.
///
/// Unknown fields are only rejected when `T` is declared with
/// `#[serde(deny_unknown_fields)]`; `serde_json` has no decoder-wide switch.
pub async fn decode_json_body<T: DeserializeOwned>(body: Body) -> Result<T, DecodeError> {
    decode_json_body_with_limit(body, DEFAULT_MAX_REQUEST_BODY_SIZE).await
}

/// Decode a JSON body of at most `limit` bytes.
pub async fn decode_json_body_with_limit<T: DeserializeOwned>(
    body: Body,
    limit: usize,
) -> Result<T, DecodeError> {
    let bytes = axum::body::to_bytes(body, limit).await.map_err(|err| {
        let source = err.into_inner();
        if source.is::<LengthLimitError>() {
            DecodeError::TooLarge { limit }
        } else {
            DecodeError::Read(source)
        }
    })?;

    Ok(serde_json::from_slice(&bytes)?)
}

/// Extractor decoding the request body as JSON.
///
/// Uses the [`RequestBodyLimit`] extension when present. Rejects with 413
/// when the body is too large and 400 for any other failure.
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let limit = req
            .extensions()
            .get::<RequestBodyLimit>()
            .copied()
            .unwrap_or_default();

        match decode_json_body_with_limit(req.into_body(), limit.0).await {
            Ok(value) => Ok(Self(value)),
            Err(err) if err.is_too_large() => Err(response::render(
                axum::http::StatusCode::PAYLOAD_TOO_LARGE,
                None,
                Some(&err),
            )),
            Err(err) => Err(response::bad_request(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Extension, Router};
    use serde::Deserialize;
    use tower::ServiceExt;

    use crate::http::log::ResponseLog;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct Item {
        name: String,
    }

    #[tokio::test]
    async fn decodes_valid_body() {
        let item: Item = decode_json_body(Body::from(r#"{"name":"a"}"#)).await.unwrap();
        assert_eq!(item, Item { name: "a".into() });
    }

    #[tokio::test]
    async fn rejects_unknown_fields() {
        let err = decode_json_body::<Item>(Body::from(r#"{"name":"a","extra":1}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)), "{err}");
    }

    #[tokio::test]
    async fn lenient_types_ignore_unknown_fields() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Lenient {
            name: String,
        }

        let item: Lenient = decode_json_body(Body::from(r#"{"name":"a","extra":1}"#))
            .await
            .unwrap();
        assert_eq!(item, Lenient { name: "a".into() });
    }

    #[tokio::test]
    async fn rejects_malformed_json() {
        let err = decode_json_body::<Item>(Body::from("{")).await.unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
        assert!(!err.is_too_large());
    }

    #[tokio::test]
    async fn rejects_oversized_body() {
        let err = decode_json_body_with_limit::<Item>(Body::from(r#"{"name":"abcdef"}"#), 4)
            .await
            .unwrap_err();
        assert!(err.is_too_large());
        assert_eq!(err.to_string(), "request body exceeds 4 bytes");
    }

    async fn create(JsonBody(item): JsonBody<Item>) -> Response {
        response::created_with_body(response::ResponseBody::raw(item.name))
    }

    fn post_request(body: &'static str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri("/items")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn extractor_accepts_valid_body() {
        let app = Router::new().route("/items", post(create));
        let response = app.oneshot(post_request(r#"{"name":"x"}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn extractor_rejects_bad_json_with_400() {
        let app = Router::new().route("/items", post(create));
        let response = app.oneshot(post_request("not json")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let log = response.extensions().get::<ResponseLog>().unwrap();
        assert!(log.error.as_deref().unwrap().starts_with("failed to decode"));
    }

    #[tokio::test]
    async fn extractor_uses_configured_limit() {
        let app = Router::new()
            .route("/items", post(create))
            .layer(Extension(RequestBodyLimit(8)));
        let response = app.oneshot(post_request(r#"{"name":"too long"}"#)).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
