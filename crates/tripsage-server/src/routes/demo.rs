//! Demo endpoints, gated by `ENABLE_DEMO`
//!
//! A canned wire-format stream for exercising clients without a model
//! provider. Returns 404 when the flag is off so the surface is invisible
//! in production.

use crate::error::ApiError;
use crate::sse::sse_response;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tripsage_core::{AgentEvent, UsageMetadata};

/// POST `/api/demo/echo-stream`
pub async fn echo_stream_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    if !state.settings.enable_demo {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "INVALID_INPUT",
            "not found",
        ));
    }
    let message = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["message"].as_str().map(String::from))
        .unwrap_or_else(|| "hello".to_string());

    let events = vec![
        AgentEvent::Started {
            user: "demo".into(),
        },
        AgentEvent::Delta {
            content: message.clone(),
        },
        AgentEvent::Final {
            content: message,
            usage: UsageMetadata::default(),
        },
    ];
    Ok(sse_response(futures::stream::iter(events)).into_response())
}
