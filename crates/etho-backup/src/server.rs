//! Read-only HTTP surface over the status board

use crate::config::ServerConfig;
use crate::status::StatusBoard;
use axum::{extract::State, http::Method, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

pub fn create_router(status: Arc<StatusBoard>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/status", get(status_snapshot))
        .route("/health", get(health))
        .with_state(status)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_origin(Any)
                .max_age(Duration::from_secs(3600)),
        )
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "etho-backup",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status_snapshot(State(status): State<Arc<StatusBoard>>) -> impl IntoResponse {
    Json(status.snapshot())
}

async fn health(State(status): State<Arc<StatusBoard>>) -> impl IntoResponse {
    Json(status.health())
}

/// Bind the configured address and serve until `cancel` fires
pub async fn serve(
    config: &ServerConfig,
    status: Arc<StatusBoard>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, status, cancel).await
}

pub async fn serve_on(
    listener: TcpListener,
    status: Arc<StatusBoard>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    info!("Status server listening on {}", listener.local_addr()?);

    axum::serve(listener, create_router(status))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("Status server stopped");
    Ok(())
}
