//! Liveness and readiness probes

use axum::{extract::State, http::StatusCode};

use super::state::AppState;

pub async fn liveness_check() -> &'static str {
    "OK"
}

/// OK once the controllers have started watching.
#[tracing::instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if state.is_ready() {
        Ok("READY")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_readiness_follows_flag() {
        let state = AppState::new(None);
        assert_eq!(
            readiness_check(State(state.clone())).await,
            Err(StatusCode::SERVICE_UNAVAILABLE)
        );

        state.set_ready(true);
        assert_eq!(readiness_check(State(state)).await, Ok("READY"));
        assert_eq!(liveness_check().await, "OK");
    }
}
