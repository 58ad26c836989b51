use axum::{extract::State, http::StatusCode, response::IntoResponse};

use super::AppState;

/// GET /metrics
pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let content_type = [("content-type", "text/plain; version=0.0.4; charset=utf-8")];
    match &state.metrics_state {
        Some(metrics) => (
            StatusCode::OK,
            content_type,
            metrics.prometheus_handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            content_type,
            "Metrics not initialized".to_string(),
        ),
    }
}
