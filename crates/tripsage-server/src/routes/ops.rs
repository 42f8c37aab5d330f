//! Operational endpoints: liveness, readiness, metrics

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// GET `/health` (liveness)
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET `/ready` (readiness)
///
/// Verifies the external KV is reachable; without it neither rate limiting
/// nor idempotency can make decisions.
pub async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.kv.ping().await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(err) => {
            tracing::warn!(error = %err, "readiness check failed: KV unreachable");
            (StatusCode::SERVICE_UNAVAILABLE, "KV unavailable")
        }
    }
}

/// GET `/metrics` (Prometheus text exposition)
pub async fn metrics_handler() -> impl IntoResponse {
    match crate::metrics::gather() {
        Ok(text) => (StatusCode::OK, text),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to gather metrics: {err}"),
        ),
    }
}
