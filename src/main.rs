//! httpkit demo server.
//!
//! Serves a few endpoints through [`HttpServer`], waits for SIGTERM/SIGINT,
//! then drains connections within the configured shutdown timeout.
//!
//! ```text
//! GET  /ok        200 "ok"
//! GET  /slow      200 "slow" after 300ms
//! GET  /stream    five chunks and a last one, 200ms apart
//! POST /echo      {"message": "..."} echoed back as JSON
//! GET  /redirect  307 to /ok
//! ```
//!
//! Prints `READY http://<addr>` on stdout once the runner is started. Logs go
//! to stderr.

use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;

use axum::body::Body;
use axum::http::header;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use httpkit::config::{load_config, validate_config, ConfigError, ServerConfig};
use httpkit::http::response::{self, ResponseBody, TEXT_PLAIN};
use httpkit::http::JsonBody;
use httpkit::observability::{logging, metrics};
use httpkit::{HttpServer, ServerRunner};

#[derive(Debug, Parser)]
#[command(name = "httpkit", version, about = "Demo HTTP server with graceful shutdown")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_tracing(&config.observability)?;

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        shutdown_timeout_ms = config.shutdown.timeout_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let fatal = CancellationToken::new();
    let runner = ServerRunner::builder()
        .server(HttpServer::from_config(&config, demo_router()))
        .on_error({
            let fatal = fatal.clone();
            move |_ctx, _err| fatal.cancel()
        })
        .on_panic({
            let fatal = fatal.clone();
            move |_ctx, _payload| fatal.cancel()
        })
        .build();

    let (ctx, signals) = runner.run()?;
    println!("READY http://{}", runner.addr());

    let failed = tokio::select! {
        _ = ctx.done() => {
            if let Some(signal) = ctx.cause() {
                tracing::info!(%signal, "Termination signal received");
            }
            false
        }
        _ = fatal.cancelled() => true,
    };
    signals.stop();

    if let Err(err) = runner.shutdown(config.shutdown.timeout()).await {
        tracing::warn!(error = %err, "Shutdown did not complete cleanly");
    }

    if failed {
        return Err("server stopped after a failure".into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn demo_router() -> Router {
    Router::new()
        .route("/ok", get(ok))
        .route("/slow", get(slow))
        .route("/stream", get(stream))
        .route("/echo", post(echo))
        .route("/redirect", get(|| async { response::redirect("/ok") }))
        .fallback(|| async { response::not_found("no such route") })
}

async fn ok() -> Response {
    response::ok_with_body(ResponseBody::raw_with_content_type("ok", TEXT_PLAIN))
}

async fn slow() -> Response {
    tokio::time::sleep(Duration::from_millis(300)).await;
    response::ok_with_body(ResponseBody::raw_with_content_type("slow", TEXT_PLAIN))
}

async fn stream() -> Response {
    let chunks = futures_util::stream::unfold(0u32, |i| async move {
        if i > 5 {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        let chunk = if i < 5 {
            format!("chunk {i}\n")
        } else {
            "last chunk\n".to_string()
        };
        Some((Ok::<_, Infallible>(chunk), i + 1))
    });

    let mut response = Response::new(Body::from_stream(chunks));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static(TEXT_PLAIN));
    response
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct Echo {
    message: String,
}

async fn echo(JsonBody(echo): JsonBody<Echo>) -> Response {
    match ResponseBody::json(&echo) {
        Ok(body) => response::ok_with_body(body),
        Err(err) => response::internal_server_error(err),
    }
}
