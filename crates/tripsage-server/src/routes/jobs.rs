//! Queue-delivered job consumers
//!
//! Deliveries are signed by the queue, re-reserved per job kind, validated,
//! and dispatched to their side-effect adapter. Handlers are idempotent by
//! event key; a non-2xx response triggers provider redelivery up to the
//! retry ceiling, after which the provider dead-letters the job.

use crate::admission::{AdmissionConfig, AuthMode, IdempotencySource};
use crate::error::ApiError;
use crate::jobs::JobEnvelope;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tripsage_core::Error as CoreError;
use uuid::Uuid;

const JOBS_CONFIG: AdmissionConfig = AdmissionConfig {
    auth: AuthMode::QueueSignature,
    rate_limit: None,
    idempotency: Some(IdempotencySource::BodyPath("/event_key")),
    span: "jobs",
};

const KNOWN_JOBS: [&str; 2] = ["notify", "memory-sync"];

/// POST `/api/jobs/{job}`
pub async fn jobs_handler(
    State(state): State<AppState>,
    Path(job): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if !KNOWN_JOBS.contains(&job.as_str()) {
        return Err(ApiError::from_core(
            &CoreError::invalid_input(format!("unknown job '{job}'")),
            &Uuid::new_v4().to_string(),
        ));
    }
    let ctx = state
        .admission
        .admit(JOBS_CONFIG, &headers, Some(&body))
        .await?;
    if ctx.is_duplicate() {
        crate::metrics::record_job(&job, "duplicate");
        return Ok(Json(json!({"ok": true, "duplicate": true})).into_response());
    }

    let envelope: JobEnvelope = serde_json::from_slice(&body).map_err(|e| {
        ApiError::from_core(
            &CoreError::invalid_input(format!("malformed job envelope: {e}")),
            &ctx.request_id,
        )
    })?;

    // Per-job-kind reservation guards against retry storms that carry the
    // same envelope to more than one consumer replica.
    let guard_key = format!("{job}:{}", envelope.event_key);
    let reservation = state
        .admission
        .reserve_event(&guard_key)
        .await
        .map_err(|e| ApiError::from_core(&e, &ctx.request_id))?;
    if reservation.is_duplicate() {
        crate::metrics::record_job(&job, "duplicate");
        return Ok(Json(json!({"ok": true, "duplicate": true})).into_response());
    }

    let result = match job.as_str() {
        "notify" => run_notify(&state, &envelope).await,
        "memory-sync" => run_memory_sync(&state, &envelope).await,
        _ => unreachable!("job name checked above"),
    };

    match result {
        Ok(()) => {
            crate::metrics::record_job(&job, "ok");
            Ok(Json(json!({"ok": true, "processed": true})).into_response())
        }
        Err(err) => {
            // Non-2xx: the queue redelivers; the reservation TTL bounds how
            // soon a retry can actually re-run the side effect.
            crate::metrics::record_job(&job, "error");
            Err(ApiError::from_core(&err, &ctx.request_id))
        }
    }
}

/// Notification email for a change event.
async fn run_notify(state: &AppState, envelope: &JobEnvelope) -> Result<(), CoreError> {
    let record = envelope.payload.record.as_ref();
    let recipient = record
        .and_then(|r| r.get("user_id"))
        .and_then(|v| v.as_str())
        .map(|user| format!("{user}@users.tripsage.app"))
        .ok_or_else(|| CoreError::invalid_input("notify payload missing user_id"))?;
    let subject = format!(
        "{} on {}",
        envelope.payload.operation.as_str(),
        envelope.payload.table
    );
    let body = serde_json::to_string(&envelope.payload).unwrap_or_default();
    state.mailer.send(&recipient, &subject, &body).await
}

/// Re-sync derived memory state for a session named in the event.
///
/// Deletes carry the row in `old_record`, so fall back to it.
async fn run_memory_sync(state: &AppState, envelope: &JobEnvelope) -> Result<(), CoreError> {
    let record = envelope
        .payload
        .record
        .as_ref()
        .or(envelope.payload.old_record.as_ref())
        .ok_or_else(|| CoreError::invalid_input("memory-sync payload missing record"))?;
    let session_id = record
        .get("session_id")
        .and_then(|v| v.as_str())
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| CoreError::invalid_input("memory-sync payload missing session_id"))?;
    let user_id = record
        .get("user_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CoreError::invalid_input("memory-sync payload missing user_id"))?;
    state
        .memory
        .sync_session(session_id, user_id)
        .await
        .map_err(|e| e.into())
}
