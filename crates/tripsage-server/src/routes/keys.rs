//! BYOK key management endpoints
//!
//! Keys arrive once, go straight into the vault as secrets, and never come
//! back out in any response, log, or error.

use crate::admission::rate_limit::RouteKey;
use crate::admission::{AdmissionConfig, AuthMode};
use crate::error::ApiError;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use secrecy::SecretString;
use serde::Deserialize;
use tripsage_core::Error as CoreError;
use tripsage_providers::ProviderRegistry;

const WRITE_CONFIG: AdmissionConfig = AdmissionConfig {
    auth: AuthMode::Required,
    rate_limit: Some(RouteKey::KeysWrite),
    idempotency: None,
    span: "keys:write",
};

const VALIDATE_CONFIG: AdmissionConfig = AdmissionConfig {
    auth: AuthMode::Required,
    rate_limit: Some(RouteKey::KeysValidate),
    idempotency: None,
    span: "keys:validate",
};

#[derive(Deserialize)]
struct KeyBody {
    service: String,
    api_key: SecretString,
}

fn providers(state: &AppState, request_id: &str) -> Result<std::sync::Arc<ProviderRegistry>, ApiError> {
    state.providers.clone().ok_or_else(|| {
        ApiError::from_core(
            &CoreError::ProviderUnavailable("key management not configured".into()),
            request_id,
        )
    })
}

/// POST `/api/keys`
pub async fn register_key_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let ctx = state
        .admission
        .admit(WRITE_CONFIG, &headers, Some(&body))
        .await?;
    let parsed: KeyBody = serde_json::from_slice(&body).map_err(|e| {
        ApiError::from_core(
            &CoreError::invalid_input(format!("malformed key body: {e}")),
            &ctx.request_id,
        )
    })?;
    let user_id = ctx.require_user()?.to_string();

    providers(&state, &ctx.request_id)?
        .register_key(&user_id, &parsed.service, parsed.api_key)
        .await
        .map_err(|e| ApiError::from_core(&e, &ctx.request_id))?;

    crate::metrics::record_request("keys:write", 204);
    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Some(rate) = ctx.rate {
        rate.apply_headers(response.headers_mut());
    }
    Ok(response)
}

/// DELETE `/api/keys/{service}`
pub async fn revoke_key_handler(
    State(state): State<AppState>,
    Path(service): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = state.admission.admit(WRITE_CONFIG, &headers, None).await?;
    let user_id = ctx.require_user()?.to_string();

    providers(&state, &ctx.request_id)?
        .revoke_key(&user_id, &service)
        .await
        .map_err(|e| ApiError::from_core(&e, &ctx.request_id))?;

    crate::metrics::record_request("keys:write", 204);
    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Some(rate) = ctx.rate {
        rate.apply_headers(response.headers_mut());
    }
    Ok(response)
}

/// POST `/api/keys/validate`
pub async fn validate_key_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let ctx = state
        .admission
        .admit(VALIDATE_CONFIG, &headers, Some(&body))
        .await?;
    let parsed: KeyBody = serde_json::from_slice(&body).map_err(|e| {
        ApiError::from_core(
            &CoreError::invalid_input(format!("malformed key body: {e}")),
            &ctx.request_id,
        )
    })?;
    ctx.require_user()?;

    let validation = providers(&state, &ctx.request_id)?
        .validate(&parsed.service, &parsed.api_key)
        .await
        .map_err(|e| ApiError::from_core(&e, &ctx.request_id))?;

    crate::metrics::record_request("keys:validate", 200);
    let mut response = Json(validation).into_response();
    if let Some(rate) = ctx.rate {
        rate.apply_headers(response.headers_mut());
    }
    Ok(response)
}
