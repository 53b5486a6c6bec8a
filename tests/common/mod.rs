//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use httpkit::http::response::{self, ResponseBody, TEXT_PLAIN};
use httpkit::lifecycle::{panic_message, RunContext, SignalGuard};
use httpkit::{HttpServer, ServerRunner};
use tokio::net::TcpStream;

/// Duration of the `/slow` handler.
pub const SLOW_HANDLER: Duration = Duration::from_millis(300);

/// Reserve a free local address. The port is released before returning.
pub fn free_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

/// Router with `/ok`, `/slow` and `/stream`.
pub fn test_router() -> Router {
    Router::new()
        .route(
            "/ok",
            get(|| async { response::ok_with_body(ResponseBody::raw_with_content_type("ok", TEXT_PLAIN)) }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(SLOW_HANDLER).await;
                response::ok_with_body(ResponseBody::raw_with_content_type("slow", TEXT_PLAIN))
            }),
        )
        .route("/stream", get(stream))
}

async fn stream() -> Response {
    let chunks = futures_util::stream::unfold(0u32, |i| async move {
        if i > 5 {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        let chunk = if i < 5 {
            format!("chunk {i}\n")
        } else {
            "last chunk\n".to_string()
        };
        Some((Ok::<_, Infallible>(chunk), i + 1))
    });
    Response::new(Body::from_stream(chunks))
}

/// Expected body of `/stream`.
pub fn stream_body() -> String {
    let mut body: String = (0..5).map(|i| format!("chunk {i}\n")).collect();
    body.push_str("last chunk\n");
    body
}

/// A started runner with its context and signal guard.
pub struct TestServer {
    pub runner: ServerRunner<HttpServer>,
    pub ctx: RunContext,
    pub signals: SignalGuard,
    pub addr: String,
    failures: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Failures reported through the runner callbacks.
    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }
}

/// Start a runner on a free port and wait until it accepts connections.
pub async fn start_server() -> TestServer {
    let addr = free_addr();
    let failures = Arc::new(Mutex::new(Vec::new()));

    let runner = ServerRunner::builder()
        .server(HttpServer::new(addr.clone(), test_router()))
        .on_error({
            let failures = failures.clone();
            move |_ctx, err| failures.lock().unwrap().push(format!("error: {err}"))
        })
        .on_panic({
            let failures = failures.clone();
            move |_ctx, payload| {
                failures
                    .lock()
                    .unwrap()
                    .push(format!("panic: {}", panic_message(&payload)))
            }
        })
        .build();

    let (ctx, signals) = runner.run().unwrap();
    wait_ready(&addr).await;

    TestServer {
        runner,
        ctx,
        signals,
        addr,
        failures,
    }
}

/// Poll until `addr` accepts TCP connections.
pub async fn wait_ready(addr: &str) {
    for _ in 0..200 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server at {addr} did not become ready");
}

/// Client that never reuses connections.
pub fn fresh_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Client that keeps idle connections open.
pub fn pooled_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_idle_timeout(Duration::from_secs(60))
        .build()
        .unwrap()
}
