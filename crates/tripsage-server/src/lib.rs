//! TripSage HTTP surface
//!
//! Routes, admission, streaming, and the webhook/job pipeline. Everything a
//! handler needs hangs off [`state::AppState`]; [`create_router`] assembles
//! the full surface.

pub mod admission;
pub mod config;
pub mod error;
pub mod jobs;
pub mod kv;
pub mod metrics;
pub mod routes;
pub mod sse;
pub mod state;
pub mod tools;

use axum::routing::{delete, get, post};
use axum::Router;
use state::AppState;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Assemble the API router over prepared state.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.allowed_origins);
    Router::new()
        .route("/health", get(routes::ops::health_handler))
        .route("/ready", get(routes::ops::ready_handler))
        .route("/metrics", get(routes::ops::metrics_handler))
        .route("/api/chat", post(routes::chat::chat_handler))
        .route("/api/chat/stream", post(routes::chat::chat_stream_handler))
        .route("/api/agents/router", post(routes::agents::router_handler))
        .route(
            "/api/agents/:workflow",
            post(routes::agents::workflow_handler),
        )
        .route("/api/keys", post(routes::keys::register_key_handler))
        .route(
            "/api/keys/validate",
            post(routes::keys::validate_key_handler),
        )
        .route("/api/keys/:service", delete(routes::keys::revoke_key_handler))
        .route("/api/hooks/:stream", post(routes::hooks::hooks_handler))
        .route("/api/jobs/:job", post(routes::jobs::jobs_handler))
        .route("/api/demo/echo-stream", post(routes::demo::echo_stream_handler))
        .layer(cors)
        .with_state(state)
}

/// Explicit-origin CORS; with no origins configured, no CORS headers are
/// added at all.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        tracing::info!("no CORS origins configured; CORS headers will not be added");
        return CorsLayer::new();
    }
    let origins: Vec<_> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}
