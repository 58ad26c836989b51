//! Health and metrics endpoints
//!
//! - `GET /healthz`: liveness, OK while the process serves requests
//! - `GET /readyz`: readiness, OK once the controllers are running
//! - `GET /metrics`: Prometheus exposition

mod health;
mod metrics;
mod state;

pub use state::AppState;

use std::net::SocketAddr;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tracing::info;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::liveness_check))
        .route("/readyz", get(health::readiness_check))
        .route("/metrics", get(metrics::get_metrics))
        .with_state(state)
}

/// Serve the router on `addr` until the task is dropped or the listener fails.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Health and metrics server listening");
    axum::serve(listener, create_router(state)).await
}
