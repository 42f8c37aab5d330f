//! Admission middleware
//!
//! The single composition point every handler goes through: signature
//! verification, authentication, rate limiting, idempotency reservation, and
//! span setup — in that order. Signature checks precede body parsing; rate
//! limiting runs after auth so identity is known; idempotency runs last so a
//! rejected duplicate has not consumed rate-limit budget on retry.

pub mod auth;
pub mod idempotency;
pub mod rate_limit;
pub mod signature;

use crate::config::RateLimits;
use crate::error::ApiError;
use crate::kv::KvHandle;
use auth::TokenVerifier;
use axum::http::HeaderMap;
use idempotency::{IdempotencyStore, Reservation};
use rate_limit::{Identity, RateLimitDecision, RateLimiter, RouteKey};
use secrecy::SecretString;
use std::time::Duration;
use tracing::Span;
use tripsage_core::Error as CoreError;

/// How a handler authenticates its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Session cookie or bearer token, mandatory
    Required,
    /// Identity attached when present, anonymous otherwise
    Optional,
    /// Queue delivery signature over the raw body
    QueueSignature,
    /// Webhook HMAC over the raw body
    WebhookSignature,
    /// No authentication (health/metrics)
    None,
}

/// Where the idempotency key comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencySource {
    /// A request header, e.g. `X-Event-Id`
    Header(&'static str),
    /// A JSON pointer into the body, e.g. `/event_key`
    BodyPath(&'static str),
}

/// Per-handler admission configuration.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionConfig {
    pub auth: AuthMode,
    pub rate_limit: Option<RouteKey>,
    pub idempotency: Option<IdempotencySource>,
    /// Telemetry span name (required)
    pub span: &'static str,
}

/// What an admitted request carries into its handler.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    /// Present when auth succeeded
    pub user_id: Option<String>,
    pub identity: Identity,
    /// Present when the route is rate limited; headers attach on all outcomes
    pub rate: Option<RateLimitDecision>,
    /// Present when the handler declared an idempotency source
    pub idempotency: Option<Reservation>,
    pub span: Span,
}

impl RequestContext {
    /// The authenticated user, or an `UNAUTHORIZED` envelope.
    pub fn require_user(&self) -> Result<&str, ApiError> {
        self.user_id.as_deref().ok_or_else(|| {
            ApiError::from_core(
                &CoreError::Unauthorized("no identity".into()),
                &self.request_id,
            )
        })
    }

    /// Whether admission classified this request as an idempotent duplicate.
    pub fn is_duplicate(&self) -> bool {
        matches!(self.idempotency, Some(Reservation::Duplicate))
    }
}

/// The admission guard, shared process-wide.
pub struct Admission {
    limiter: RateLimiter,
    idempotency: IdempotencyStore,
    tokens: TokenVerifier,
    webhook_secret: SecretString,
    queue_key: SecretString,
    queue_key_next: Option<SecretString>,
    limits: RateLimits,
}

impl Admission {
    pub fn new(
        kv: KvHandle,
        tokens: TokenVerifier,
        webhook_secret: SecretString,
        queue_key: SecretString,
        queue_key_next: Option<SecretString>,
        limits: RateLimits,
        idempotency_ttl: Duration,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(kv.clone()),
            idempotency: IdempotencyStore::new(kv, idempotency_ttl),
            tokens,
            webhook_secret,
            queue_key,
            queue_key_next,
            limits,
        }
    }

    /// Token issuance, used by session bootstrap and tests.
    pub fn tokens(&self) -> &TokenVerifier {
        &self.tokens
    }

    /// Reserve an arbitrary event key (webhook intake, job consumers).
    pub async fn reserve_event(&self, key: &str) -> Result<Reservation, CoreError> {
        self.idempotency.reserve(key).await
    }

    fn limit_for(&self, route: RouteKey) -> u32 {
        match route {
            RouteKey::Chat => self.limits.chat_per_min,
            RouteKey::ChatStream => self.limits.chat_stream_per_min,
            RouteKey::AgentsRouter => self.limits.router_per_min,
            RouteKey::AgentsWorkflow(_) => self.limits.agents_per_min,
            RouteKey::KeysWrite => self.limits.keys_write_per_min,
            RouteKey::KeysValidate => self.limits.keys_validate_per_min,
        }
    }

    /// Run the full admission sequence for one request.
    ///
    /// `body` must be the raw request body whenever the config declares a
    /// signature auth mode or a body-path idempotency source.
    pub async fn admit(
        &self,
        config: AdmissionConfig,
        headers: &HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<RequestContext, ApiError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "request",
            handler = config.span,
            request_id = %request_id,
            user = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        // 1. Signature verification, before any body interpretation.
        match config.auth {
            AuthMode::WebhookSignature => {
                let provided = header_str(headers, signature::WEBHOOK_SIGNATURE_HEADER)
                    .ok_or_else(|| self.unauthorized(&request_id, "missing webhook signature"))?;
                let body = body
                    .ok_or_else(|| self.unauthorized(&request_id, "missing webhook body"))?;
                signature::verify_webhook(&self.webhook_secret, body, &provided)
                    .map_err(|e| ApiError::from_core(&e, &request_id))?;
            }
            AuthMode::QueueSignature => {
                let provided = header_str(headers, signature::QUEUE_SIGNATURE_HEADER)
                    .ok_or_else(|| self.unauthorized(&request_id, "missing queue signature"))?;
                let body =
                    body.ok_or_else(|| self.unauthorized(&request_id, "missing queue body"))?;
                signature::verify_queue(
                    &self.queue_key,
                    self.queue_key_next.as_ref(),
                    body,
                    &provided,
                )
                .map_err(|e| ApiError::from_core(&e, &request_id))?;
            }
            _ => {}
        }

        // 2. Authentication.
        let user_id = match config.auth {
            AuthMode::Required | AuthMode::Optional => {
                let token = auth::extract_token(headers);
                match (token, config.auth) {
                    (Some(token), _) => Some(
                        self.tokens
                            .verify(&token)
                            .map_err(|e| ApiError::from_core(&e, &request_id))?,
                    ),
                    (None, AuthMode::Required) => {
                        return Err(self.unauthorized(&request_id, "no credentials"));
                    }
                    (None, _) => None,
                }
            }
            _ => None,
        };
        if let Some(user) = &user_id {
            span.record("user", tracing::field::display(user));
        }
        let identity = match &user_id {
            Some(user) => Identity::User(user.clone()),
            None => Identity::Ip(auth::client_ip(headers)),
        };

        // 3. Rate limiting, identity now known.
        let rate = match config.rate_limit {
            Some(route) => {
                let limit = self.limit_for(route);
                let decision = self
                    .limiter
                    .check(route, &identity, limit, self.limits.window)
                    .await
                    .map_err(|e| ApiError::from_core(&e, &request_id))?;
                if !decision.allowed {
                    crate::metrics::record_rate_limited(&route.as_str());
                    let mut err = ApiError::from_core(
                        &CoreError::RateLimited {
                            retry_after_secs: decision.retry_after.unwrap_or(1),
                        },
                        &request_id,
                    );
                    err.details = Some(serde_json::json!({
                        "limit": decision.limit,
                        "reset_at": decision.reset_at,
                    }));
                    return Err(err);
                }
                Some(decision)
            }
            None => None,
        };

        // 4. Idempotency reservation, last.
        let idempotency = match config.idempotency {
            Some(source) => {
                let key = match source {
                    IdempotencySource::Header(name) => header_str(headers, name),
                    IdempotencySource::BodyPath(pointer) => body
                        .and_then(|raw| serde_json::from_slice::<serde_json::Value>(raw).ok())
                        .and_then(|json| {
                            json.pointer(pointer).and_then(|v| v.as_str().map(String::from))
                        }),
                };
                let key = key.ok_or_else(|| {
                    ApiError::from_core(
                        &CoreError::invalid_input("missing idempotency key"),
                        &request_id,
                    )
                })?;
                Some(
                    self.idempotency
                        .reserve(&key)
                        .await
                        .map_err(|e| ApiError::from_core(&e, &request_id))?,
                )
            }
            None => None,
        };

        Ok(RequestContext {
            request_id,
            user_id,
            identity,
            rate,
            idempotency,
            span,
        })
    }

    fn unauthorized(&self, request_id: &str, reason: &str) -> ApiError {
        ApiError::from_core(&CoreError::Unauthorized(reason.to_string()), request_id)
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;
    use std::sync::Arc;

    fn admission() -> Admission {
        Admission::new(
            Arc::new(InMemoryKv::new()),
            TokenVerifier::new(SecretString::from("auth-secret")),
            SecretString::from("hook-secret"),
            SecretString::from("queue-secret"),
            None,
            RateLimits::default(),
            Duration::from_secs(300),
        )
    }

    fn bearer_headers(admission: &Admission, user: &str) -> HeaderMap {
        let token = admission.tokens().issue(user, 3600);
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        headers
    }

    const CHAT: AdmissionConfig = AdmissionConfig {
        auth: AuthMode::Required,
        rate_limit: Some(RouteKey::Chat),
        idempotency: None,
        span: "chat",
    };

    #[tokio::test]
    async fn test_required_auth_rejects_anonymous() {
        let admission = admission();
        let err = admission
            .admit(CHAT, &HeaderMap::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_admits_with_token_and_rate_headers() {
        let admission = admission();
        let headers = bearer_headers(&admission, "u-9");
        let ctx = admission.admit(CHAT, &headers, None).await.unwrap();
        assert_eq!(ctx.user_id.as_deref(), Some("u-9"));
        assert!(ctx.rate.is_some());
        assert!(!ctx.is_duplicate());
    }

    #[tokio::test]
    async fn test_webhook_signature_checked_before_auth() {
        let admission = admission();
        let config = AdmissionConfig {
            auth: AuthMode::WebhookSignature,
            rate_limit: None,
            idempotency: None,
            span: "hooks",
        };
        let body = br#"{"type":"INSERT"}"#;
        let err = admission
            .admit(config, &HeaderMap::new(), Some(body))
            .await
            .unwrap_err();
        assert_eq!(err.code, "UNAUTHORIZED");

        let mut headers = HeaderMap::new();
        let sig = signature::sign(&SecretString::from("hook-secret"), body);
        headers.insert(signature::WEBHOOK_SIGNATURE_HEADER, sig.parse().unwrap());
        let ctx = admission.admit(config, &headers, Some(body)).await.unwrap();
        assert!(ctx.user_id.is_none());
    }

    #[tokio::test]
    async fn test_idempotency_header_duplicate_detection() {
        let admission = admission();
        let config = AdmissionConfig {
            auth: AuthMode::None,
            rate_limit: None,
            idempotency: Some(IdempotencySource::Header("x-event-id")),
            span: "hooks",
        };
        let mut headers = HeaderMap::new();
        headers.insert("x-event-id", "evt-42".parse().unwrap());

        let first = admission.admit(config, &headers, None).await.unwrap();
        assert!(!first.is_duplicate());
        let second = admission.admit(config, &headers, None).await.unwrap();
        assert!(second.is_duplicate());
    }

    #[tokio::test]
    async fn test_idempotency_body_path() {
        let admission = admission();
        let config = AdmissionConfig {
            auth: AuthMode::None,
            rate_limit: None,
            idempotency: Some(IdempotencySource::BodyPath("/event_key")),
            span: "jobs",
        };
        let body = br#"{"event_key":"k-1","payload":{}}"#;
        let ctx = admission
            .admit(config, &HeaderMap::new(), Some(body))
            .await
            .unwrap();
        assert!(!ctx.is_duplicate());

        let missing = admission
            .admit(config, &HeaderMap::new(), Some(br#"{"payload":{}}"#))
            .await
            .unwrap_err();
        assert_eq!(missing.code, "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_duplicate_does_not_consume_rate_budget() {
        let admission = admission();
        let config = AdmissionConfig {
            auth: AuthMode::Required,
            rate_limit: Some(RouteKey::KeysWrite),
            idempotency: Some(IdempotencySource::Header("x-event-id")),
            span: "keys",
        };
        let mut headers = bearer_headers(&admission, "u-1");
        headers.insert("x-event-id", "evt-7".parse().unwrap());

        let first = admission.admit(config, &headers, None).await.unwrap();
        assert!(!first.is_duplicate());
        // Fixed ordering: the reservation runs after the rate-limit check,
        // so the duplicate is still classified and the handler can short-
        // circuit with `{duplicate: true}`.
        let second = admission.admit(config, &headers, None).await.unwrap();
        assert!(second.is_duplicate());
        assert!(second.rate.is_some());
    }
}
