//! Agent endpoints
//!
//! `/api/agents/router` classifies without executing; the per-workflow
//! endpoints run the tool loop with that workflow's whitelist and stop
//! policy. The confidence fallback to general chat lives in the chat
//! pipeline, not here: a direct workflow call is explicit intent.

use crate::admission::rate_limit::RouteKey;
use crate::admission::{AdmissionConfig, AuthMode};
use crate::error::ApiError;
use crate::routes::chat::chat_events;
use crate::sse::sse_response;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tripsage_core::{ChatMessage, Error as CoreError, WorkflowKind};
use uuid::Uuid;

const ROUTER_CONFIG: AdmissionConfig = AdmissionConfig {
    auth: AuthMode::Required,
    rate_limit: Some(RouteKey::AgentsRouter),
    idempotency: None,
    span: "agents:router",
};

#[derive(Debug, Deserialize)]
struct RouterBody {
    message: String,
    #[serde(default)]
    session_id: Option<Uuid>,
}

/// POST `/api/agents/router`
pub async fn router_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let ctx = state
        .admission
        .admit(ROUTER_CONFIG, &headers, Some(&body))
        .await?;
    let parsed: RouterBody = serde_json::from_slice(&body).map_err(|e| {
        ApiError::from_core(
            &CoreError::invalid_input(format!("malformed router body: {e}")),
            &ctx.request_id,
        )
    })?;
    if parsed.message.trim().is_empty() {
        return Err(ApiError::from_core(
            &CoreError::invalid_input("message must not be empty"),
            &ctx.request_id,
        ));
    }
    let user_id = ctx.require_user()?.to_string();

    let context = match parsed.session_id {
        Some(session) => {
            let turns = state
                .memory
                .fetch_context(session, &user_id, state.settings.context_limit, None)
                .await
                .unwrap_or_default();
            let text = turns
                .iter()
                .map(|turn| format!("{}: {}", turn.role.as_str(), turn.text_content()))
                .collect::<Vec<_>>()
                .join("\n");
            (!text.is_empty()).then_some(text)
        }
        None => None,
    };

    let model = state
        .resolver
        .resolve(&user_id, None)
        .await
        .map_err(|e| ApiError::from_core(&e, &ctx.request_id))?;
    let decision = state
        .router
        .classify(&model, &parsed.message, context.as_deref())
        .await
        .map_err(|e| ApiError::from_core(&e, &ctx.request_id))?;

    crate::metrics::record_request("agents:router", 200);
    let mut response = Json(serde_json::json!({
        "workflow": decision.workflow,
        "confidence": decision.confidence,
        "reasoning": decision.reasoning,
    }))
    .into_response();
    if let Some(rate) = ctx.rate {
        rate.apply_headers(response.headers_mut());
    }
    Ok(response)
}

/// POST `/api/agents/{workflow}`
pub async fn workflow_handler(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let Some(kind) = WorkflowKind::from_route_segment(&segment) else {
        return Err(ApiError::from_core(
            &CoreError::invalid_input(format!("unknown workflow '{segment}'")),
            &uuid::Uuid::new_v4().to_string(),
        ));
    };
    let config = AdmissionConfig {
        auth: AuthMode::Required,
        rate_limit: Some(RouteKey::AgentsWorkflow(kind)),
        idempotency: None,
        span: "agents:workflow",
    };
    let ctx = state.admission.admit(config, &headers, Some(&body)).await?;

    let spec = tripsage_core::spec_for(kind);
    let raw: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        ApiError::from_core(
            &CoreError::invalid_input(format!("malformed request body: {e}")),
            &ctx.request_id,
        )
    })?;
    let request = spec
        .validate_request(&raw)
        .map_err(|e| ApiError::from_core(&e, &ctx.request_id))?;
    let user_id = ctx.require_user()?.to_string();

    let events = chat_events(
        state.clone(),
        user_id,
        request.session_id,
        vec![ChatMessage::user(request.message)],
        Some(kind),
    );
    crate::metrics::record_request("agents:workflow", 200);
    let mut response = sse_response(events).into_response();
    if let Some(rate) = ctx.rate {
        rate.apply_headers(response.headers_mut());
    }
    Ok(response)
}
