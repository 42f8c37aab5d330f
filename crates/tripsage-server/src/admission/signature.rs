//! HMAC signature verification
//!
//! Webhooks sign the raw body with the shared secret; queue deliveries sign
//! with the current signing key, and the next key is also accepted so key
//! rotation never drops deliveries. Comparison is constant-time.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tripsage_core::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-signature-hmac";
/// Header carrying the queue delivery signature.
pub const QUEUE_SIGNATURE_HEADER: &str = "x-queue-signature";

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &SecretString, body: &[u8]) -> String {
    #[allow(clippy::expect_used)] // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .expect("HMAC key of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a hex signature.
pub fn verify(secret: &SecretString, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .expect("HMAC key of any length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Verify a webhook body against the shared secret.
pub fn verify_webhook(secret: &SecretString, body: &[u8], signature_hex: &str) -> Result<()> {
    if verify(secret, body, signature_hex) {
        Ok(())
    } else {
        Err(Error::Unauthorized("webhook signature mismatch".into()))
    }
}

/// Verify a queue delivery against the current key, then the next key.
pub fn verify_queue(
    current: &SecretString,
    next: Option<&SecretString>,
    body: &[u8],
    signature_hex: &str,
) -> Result<()> {
    if verify(current, body, signature_hex) {
        return Ok(());
    }
    if let Some(next) = next {
        if verify(next, body, signature_hex) {
            return Ok(());
        }
    }
    Err(Error::Unauthorized("queue signature mismatch".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let key = secret("shared");
        let body = br#"{"type":"INSERT"}"#;
        let signature = sign(&key, body);
        assert!(verify(&key, body, &signature));
    }

    #[test]
    fn test_verify_rejects_tampered_body() {
        let key = secret("shared");
        let signature = sign(&key, b"original");
        assert!(!verify(&key, b"tampered", &signature));
    }

    #[test]
    fn test_verify_rejects_bad_hex() {
        let key = secret("shared");
        assert!(!verify(&key, b"body", "not-hex!"));
    }

    #[test]
    fn test_queue_rotation_accepts_next_key() {
        let current = secret("new-key");
        let next = secret("old-key");
        let body = b"payload";
        let signed_with_old = sign(&next, body);
        verify_queue(&current, Some(&next), body, &signed_with_old).unwrap();
    }

    #[test]
    fn test_queue_rejects_unknown_key() {
        let current = secret("a");
        let body = b"payload";
        let foreign = sign(&secret("b"), body);
        assert!(verify_queue(&current, None, body, &foreign).is_err());
    }
}
