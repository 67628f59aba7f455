//! HTTP status endpoint.
//!
//! Read-only view of the running agent:
//! - `GET /health` liveness and version
//! - `GET /stats` the processor counters
//!
//! # Architecture
//!
//! ```text
//! consumer loop ──→ ProcessorStats (atomics) ←── GET /stats
//! ```

use crate::stats::{SharedProcessorStats, StatsSnapshot};
use axum::{
    extract::State,
    http::HeaderValue,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// GET /health
async fn health(State(stats): State<SharedProcessorStats>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: stats.stats().uptime_secs,
    })
}

/// GET /stats
async fn stats(State(stats): State<SharedProcessorStats>) -> Json<StatsSnapshot> {
    Json(stats.stats())
}

pub fn router(stats: SharedProcessorStats) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(self::stats))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(stats)
}

/// Run the HTTP server on localhost. Returns the bound address and a sender
/// that stops the server.
pub async fn run(
    config: ServerConfig,
    stats: SharedProcessorStats,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(stats);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Status server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
