//! Webhook intake
//!
//! Signature-verified database-change events. Each event derives a
//! deterministic key, reserves it, and is then either handled inline (cheap
//! derived-state work) or published as a durable job. Duplicates are
//! acknowledged without side effects.

use crate::admission::{AdmissionConfig, AuthMode, IdempotencySource};
use crate::error::ApiError;
use crate::jobs::{ChangeEvent, ChangeOperation, JobEnvelope};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tripsage_core::Error as CoreError;
use uuid::Uuid;

const HOOKS_CONFIG: AdmissionConfig = AdmissionConfig {
    auth: AuthMode::WebhookSignature,
    rate_limit: None,
    idempotency: Some(IdempotencySource::Header("x-event-id")),
    span: "hooks",
};

const KNOWN_STREAMS: [&str; 3] = ["trips", "files", "cache"];

/// POST `/api/hooks/{stream}`
pub async fn hooks_handler(
    State(state): State<AppState>,
    Path(stream): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if !KNOWN_STREAMS.contains(&stream.as_str()) {
        return Err(ApiError::from_core(
            &CoreError::invalid_input(format!("unknown hook stream '{stream}'")),
            &Uuid::new_v4().to_string(),
        ));
    }
    let ctx = state
        .admission
        .admit(HOOKS_CONFIG, &headers, Some(&body))
        .await?;
    if ctx.is_duplicate() {
        crate::metrics::record_request("hooks", 200);
        return Ok(Json(json!({"ok": true, "duplicate": true})).into_response());
    }

    let event: ChangeEvent = serde_json::from_slice(&body).map_err(|e| {
        ApiError::from_core(
            &CoreError::invalid_input(format!("malformed change event: {e}")),
            &ctx.request_id,
        )
    })?;
    let event_key = event.event_key();

    // Content-derived reservation; catches replays that carry fresh
    // delivery ids.
    let reservation = state
        .admission
        .reserve_event(&format!("hook:{event_key}"))
        .await
        .map_err(|e| ApiError::from_core(&e, &ctx.request_id))?;
    if reservation.is_duplicate() {
        crate::metrics::record_request("hooks", 200);
        return Ok(Json(json!({"ok": true, "duplicate": true})).into_response());
    }

    match (stream.as_str(), event.operation) {
        // Cache invalidation on insert/update is cheap and best-effort:
        // run inline.
        ("cache", ChangeOperation::Insert | ChangeOperation::Update) => {
            if let Some((session_id, user_id)) = session_ref(&event) {
                if let Err(err) = state.memory.sync_session(session_id, &user_id).await {
                    tracing::warn!(error = %err, "inline cache sync failed");
                }
            }
            crate::metrics::record_request("hooks", 200);
            Ok(Json(json!({"ok": true, "processed": true})).into_response())
        }
        // A cache delete means derived state for the session must be torn
        // down and rebuilt; that is long and retryable, so it becomes a
        // durable memory-sync job.
        ("cache", ChangeOperation::Delete) => {
            enqueue(&state, &ctx, "memory-sync", event_key, event).await
        }
        // Trip/file changes fan out notifications through the queue.
        _ => enqueue(&state, &ctx, "notify", event_key, event).await,
    }
}

async fn enqueue(
    state: &AppState,
    ctx: &crate::admission::RequestContext,
    job: &str,
    event_key: String,
    event: ChangeEvent,
) -> Result<Response, ApiError> {
    let envelope = JobEnvelope {
        event_key,
        payload: event,
    };
    state
        .publisher
        .publish(job, &envelope)
        .await
        .map_err(|e| ApiError::from_core(&e, &ctx.request_id))?;
    crate::metrics::record_request("hooks", 200);
    Ok(Json(json!({"ok": true, "enqueued": true})).into_response())
}

/// `(session_id, user_id)` out of a change record, when present.
fn session_ref(event: &ChangeEvent) -> Option<(Uuid, String)> {
    let record = event.record.as_ref()?;
    let session_id = record
        .get("session_id")
        .and_then(|v| v.as_str())
        .and_then(|raw| Uuid::parse_str(raw).ok())?;
    let user_id = record.get("user_id")?.as_str()?.to_string();
    Some((session_id, user_id))
}
