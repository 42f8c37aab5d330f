//! Authentication
//!
//! Requests carry either a bearer token or a `session` cookie. Tokens are
//! stateless: `user_id.expiry_unix.hmac_hex` under the auth secret, so
//! verification needs no store round-trip. Establishing identity is all this
//! layer does; resource access is enforced at the storage boundary.

use axum::http::HeaderMap;
use chrono::Utc;
use secrecy::SecretString;
use tripsage_core::{Error, Result};

use super::signature;

/// Stateless session-token verifier.
pub struct TokenVerifier {
    secret: SecretString,
}

impl TokenVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Issue a token for `user_id` valid for `ttl_secs`.
    pub fn issue(&self, user_id: &str, ttl_secs: i64) -> String {
        let expiry = Utc::now().timestamp() + ttl_secs;
        let payload = format!("{user_id}.{expiry}");
        let signature = signature::sign(&self.secret, payload.as_bytes());
        format!("{payload}.{signature}")
    }

    /// Verify a token; returns the user id.
    pub fn verify(&self, token: &str) -> Result<String> {
        let mut parts = token.rsplitn(2, '.');
        let (Some(sig), Some(payload)) = (parts.next(), parts.next()) else {
            return Err(Error::Unauthorized("malformed token".into()));
        };
        if !signature::verify(&self.secret, payload.as_bytes(), sig) {
            return Err(Error::Unauthorized("token signature mismatch".into()));
        }
        let mut fields = payload.rsplitn(2, '.');
        let (Some(expiry_raw), Some(user_id)) = (fields.next(), fields.next()) else {
            return Err(Error::Unauthorized("malformed token payload".into()));
        };
        let expiry: i64 = expiry_raw
            .parse()
            .map_err(|_| Error::Unauthorized("malformed token expiry".into()))?;
        if expiry < Utc::now().timestamp() {
            return Err(Error::Unauthorized("token expired".into()));
        }
        Ok(user_id.to_string())
    }
}

/// Pull the credential out of the request: `Authorization: Bearer` wins,
/// then the `session` cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(raw) = value.to_str() {
            if let Some(token) = raw.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }
    let cookies = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let pair = pair.trim();
        if let Some(token) = pair.strip_prefix("session=") {
            return Some(token.to_string());
        }
    }
    None
}

/// Best-effort client address for anonymous identities, trusting the load
/// balancer's forwarding header.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
