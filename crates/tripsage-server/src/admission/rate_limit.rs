//! Sliding-window rate limiter
//!
//! One decision per admitted request, keyed by `(route, identity)`. The
//! window state lives in the external KV; the whole probe is a single atomic
//! operation there. On KV failure the limiter fails open for authenticated
//! identities and closed for anonymous ones; that trade-off is fixed.

use crate::kv::KvHandle;
use axum::http::{HeaderMap, HeaderValue};
use chrono::Utc;
use std::time::Duration;
use tracing::warn;
use tripsage_core::{Error, Result, WorkflowKind};

/// Enumerated route keys (§external-interface table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKey {
    Chat,
    ChatStream,
    AgentsRouter,
    AgentsWorkflow(WorkflowKind),
    KeysWrite,
    KeysValidate,
}

impl RouteKey {
    pub fn as_str(&self) -> String {
        match self {
            RouteKey::Chat => "chat".to_string(),
            RouteKey::ChatStream => "chat:stream".to_string(),
            RouteKey::AgentsRouter => "agents:router".to_string(),
            RouteKey::AgentsWorkflow(kind) => format!("agents:{}", kind.route_segment()),
            RouteKey::KeysWrite => "keys:write".to_string(),
            RouteKey::KeysValidate => "keys:validate".to_string(),
        }
    }
}

/// Who is being limited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User(String),
    Ip(String),
}

impl Identity {
    pub fn key(&self) -> String {
        match self {
            Identity::User(id) => format!("user:{id}"),
            Identity::Ip(ip) => format!("ip:{ip}"),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::User(_))
    }
}

/// An allow/deny decision with the header values to attach either way.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch seconds when the window rolls over
    pub reset_at: u64,
    /// Seconds to wait, set on deny
    pub retry_after: Option<u64>,
}

impl RateLimitDecision {
    fn open(limit: u32) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_at: Utc::now().timestamp() as u64,
            retry_after: None,
        }
    }

    /// Attach the standard headers (allow and deny alike).
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        let entries = [
            ("x-ratelimit-limit", self.limit.to_string()),
            ("x-ratelimit-remaining", self.remaining.to_string()),
            ("x-ratelimit-reset", self.reset_at.to_string()),
        ];
        for (name, value) in entries {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        }
        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                headers.insert(axum::http::header::RETRY_AFTER, value);
            }
        }
    }
}

/// KV call budget; past this the fail-open/fail-closed policy applies.
const KV_TIMEOUT: Duration = Duration::from_secs(1);

/// The limiter itself: stateless besides the KV handle.
pub struct RateLimiter {
    kv: KvHandle,
}

impl RateLimiter {
    pub fn new(kv: KvHandle) -> Self {
        Self { kv }
    }

    /// Probe the window for `(route, identity)`.
    pub async fn check(
        &self,
        route: RouteKey,
        identity: &Identity,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitDecision> {
        let key = format!("ratelimit:{}:{}", route.as_str(), identity.key());
        let now_ms = Utc::now().timestamp_millis() as u64;

        let probe = tokio::time::timeout(
            KV_TIMEOUT,
            self.kv.sliding_window(&key, window, limit, now_ms),
        )
        .await;

        let decision = match probe {
            Ok(Ok(window_decision)) => {
                let window_ms = window.as_millis() as u64;
                let reset_ms = window_decision
                    .oldest_ms
                    .map_or(now_ms + window_ms, |oldest| oldest + window_ms);
                let remaining = limit.saturating_sub(window_decision.count);
                let retry_after = (!window_decision.allowed)
                    .then(|| (reset_ms.saturating_sub(now_ms)).div_ceil(1000).max(1));
                RateLimitDecision {
                    allowed: window_decision.allowed,
                    limit,
                    remaining,
                    reset_at: reset_ms / 1000,
                    retry_after,
                }
            }
            Ok(Err(_)) | Err(_) => {
                if identity.is_authenticated() {
                    warn!(route = %route.as_str(), "KV unavailable; failing open for authenticated identity");
                    RateLimitDecision::open(limit)
                } else {
                    warn!(route = %route.as_str(), "KV unavailable; failing closed for anonymous identity");
                    return Err(Error::RateLimited {
                        retry_after_secs: 1,
                    });
                }
            }
        };
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;
    use std::sync::Arc;

    fn limiter(kv: Arc<InMemoryKv>) -> RateLimiter {
        RateLimiter::new(kv)
    }

    #[tokio::test]
    async fn test_remaining_is_monotonic_within_window() {
        let kv = Arc::new(InMemoryKv::new());
        let limiter = limiter(Arc::clone(&kv));
        let identity = Identity::User("u1".into());
        let mut last_remaining = u32::MAX;
        for _ in 0..5 {
            let decision = limiter
                .check(RouteKey::Chat, &identity, 10, Duration::from_secs(60))
                .await
                .unwrap();
            assert!(decision.allowed);
            assert!(decision.remaining < last_remaining || last_remaining == u32::MAX);
            assert!(decision.remaining <= last_remaining);
            last_remaining = decision.remaining;
        }
    }

    #[tokio::test]
    async fn test_denies_over_limit_with_retry_after() {
        let kv = Arc::new(InMemoryKv::new());
        let limiter = limiter(Arc::clone(&kv));
        let identity = Identity::User("u1".into());
        for _ in 0..3 {
            assert!(limiter
                .check(RouteKey::ChatStream, &identity, 3, Duration::from_secs(60))
                .await
                .unwrap()
                .allowed);
        }
        let denied = limiter
            .check(RouteKey::ChatStream, &identity, 3, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert!(denied.retry_after.unwrap_or(0) >= 1);
        assert_eq!(denied.remaining, 0);
    }

    #[tokio::test]
    async fn test_routes_have_separate_windows() {
        let kv = Arc::new(InMemoryKv::new());
        let limiter = limiter(Arc::clone(&kv));
        let identity = Identity::User("u1".into());
        assert!(limiter
            .check(RouteKey::Chat, &identity, 1, Duration::from_secs(60))
            .await
            .unwrap()
            .allowed);
        // Same identity, different route: fresh window.
        assert!(limiter
            .check(RouteKey::KeysWrite, &identity, 1, Duration::from_secs(60))
            .await
            .unwrap()
            .allowed);
    }

    #[tokio::test]
    async fn test_fails_open_for_authenticated() {
        let kv = Arc::new(InMemoryKv::new());
        kv.set_unavailable(true);
        let limiter = limiter(Arc::clone(&kv));
        let decision = limiter
            .check(
                RouteKey::Chat,
                &Identity::User("u1".into()),
                5,
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_fails_closed_for_anonymous() {
        let kv = Arc::new(InMemoryKv::new());
        kv.set_unavailable(true);
        let limiter = limiter(Arc::clone(&kv));
        let err = limiter
            .check(
                RouteKey::Chat,
                &Identity::Ip("203.0.113.9".into()),
                5,
                Duration::from_secs(60),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RATE_LIMITED");
    }

    #[test]
    fn test_route_key_strings() {
        assert_eq!(RouteKey::ChatStream.as_str(), "chat:stream");
        assert_eq!(
            RouteKey::AgentsWorkflow(WorkflowKind::FlightSearch).as_str(),
            "agents:flights"
        );
    }

    #[test]
    fn test_headers_applied_on_deny() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 40,
            remaining: 0,
            reset_at: 1_700_000_000,
            retry_after: Some(30),
        };
        let mut headers = HeaderMap::new();
        decision.apply_headers(&mut headers);
        assert_eq!(headers["x-ratelimit-limit"], "40");
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert_eq!(headers["retry-after"], "30");
    }
}
