//! API error envelope
//!
//! Every non-streaming failure renders as the stable envelope:
//! `{"error": code, "message": ..., "details": ..., "request_id": ...}`.
//! Streaming failures are rendered as `error` wire events instead.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tripsage_core::Error as CoreError;

/// A request-scoped error carrying its correlation id.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub request_id: String,
    /// Seconds for the `Retry-After` header on 429s
    pub retry_after: Option<u64>,
}

/// Serialized envelope body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub request_id: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
            request_id: uuid::Uuid::new_v4().to_string(),
            retry_after: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Map a core error to its HTTP rendering.
    pub fn from_core(err: &CoreError, request_id: &str) -> Self {
        let status = match err {
            CoreError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoreError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            CoreError::IdempotentDuplicate(_) => StatusCode::OK,
            CoreError::ProviderUnavailable(_)
            | CoreError::NoProviderAvailable
            | CoreError::VaultUnavailable(_) => StatusCode::BAD_GATEWAY,
            CoreError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            CoreError::StopPolicyExhausted(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let details = match err {
            CoreError::InvalidInput { details, .. } => details.clone(),
            _ => None,
        };
        let retry_after = match err {
            CoreError::RateLimited { retry_after_secs } => Some((*retry_after_secs).max(1)),
            _ => None,
        };
        Self {
            status,
            code: err.code(),
            // Upstream strings for 401/429 are intentionally generic (no
            // provider errors, no credential material).
            message: match err {
                CoreError::Unauthorized(_) => "authentication required".to_string(),
                CoreError::RateLimited { .. } => "rate limit exceeded".to_string(),
                other => other.to_string(),
            },
            details,
            request_id: request_id.to_string(),
            retry_after,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let request_id = uuid::Uuid::new_v4().to_string();
        Self::from_core(&err, &request_id)
    }
}

impl From<tripsage_memory::MemoryError> for ApiError {
    fn from(err: tripsage_memory::MemoryError) -> Self {
        let core: CoreError = err.into();
        core.into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, request_id = %self.request_id, "request failed: {}", self.message);
        }
        let body = Json(ErrorEnvelope {
            error: self.code.to_string(),
            message: self.message,
            details: self.details,
            request_id: self.request_id,
        });
        let mut response = (self.status, body).into_response();
        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = header::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias for request handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_maps_to_429_with_retry_after() {
        let err = ApiError::from(CoreError::RateLimited {
            retry_after_secs: 12,
        });
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.code, "RATE_LIMITED");
        assert_eq!(err.retry_after, Some(12));
    }

    #[test]
    fn test_unauthorized_message_is_generic() {
        let err = ApiError::from(CoreError::Unauthorized("token sk-abc123 expired".into()));
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert!(!err.message.contains("sk-abc123"));
    }

    #[test]
    fn test_invalid_input_carries_details() {
        let err = ApiError::from(CoreError::invalid_input_with_details(
            "bad body",
            serde_json::json!([{"path": "/messages"}]),
        ));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.details.is_some());
    }

    #[test]
    fn test_provider_errors_are_bad_gateway() {
        assert_eq!(
            ApiError::from(CoreError::NoProviderAvailable).status,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(CoreError::VaultUnavailable("down".into())).status,
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_envelope_serialization() {
        let envelope = ErrorEnvelope {
            error: "RATE_LIMITED".into(),
            message: "rate limit exceeded".into(),
            details: None,
            request_id: "req-1".into(),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["error"], "RATE_LIMITED");
        assert_eq!(json["request_id"], "req-1");
        assert!(json["details"].is_null());
    }
}
