//! PII redaction
//!
//! Strips email addresses, phone numbers, and payment-card-like digit runs
//! before content leaves the canonical trust boundary. Each match is replaced
//! with an opaque token carrying a hash prefix; the full SHA-256 of the
//! original goes into turn metadata for auditability.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use tripsage_core::{ContentPart, Turn};

/// One redacted span, recorded in metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionRecord {
    /// Pattern kind: "email", "phone", or "card"
    pub kind: String,
    /// Hex SHA-256 of the original span
    pub sha256: String,
}

struct Patterns {
    email: Regex,
    card: Regex,
    phone: Regex,
}

#[allow(clippy::expect_used)] // static patterns, validated by tests
fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        email: Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}")
            .expect("email pattern"),
        // 13-19 digits allowing space/dash separators; checked before phone so
        // long card numbers are not half-eaten by the phone pattern.
        card: Regex::new(r"\b(?:\d[ \-]?){13,19}\b").expect("card pattern"),
        phone: Regex::new(r"\+?\d[\d \-().]{6,}\d").expect("phone pattern"),
    })
}

fn redact_kind(text: &str, regex: &Regex, kind: &str, records: &mut Vec<RedactionRecord>) -> String {
    regex
        .replace_all(text, |captures: &regex::Captures<'_>| {
            let original = &captures[0];
            let digest = hex::encode(Sha256::digest(original.as_bytes()));
            let token = format!("[{kind}:{}]", &digest[..8]);
            records.push(RedactionRecord {
                kind: kind.to_string(),
                sha256: digest,
            });
            token
        })
        .into_owned()
}

/// Redact one text fragment, returning the scrubbed text and audit records.
pub fn redact_text(text: &str) -> (String, Vec<RedactionRecord>) {
    let patterns = patterns();
    let mut records = Vec::new();
    let text = redact_kind(text, &patterns.email, "email", &mut records);
    let text = redact_kind(&text, &patterns.card, "card", &mut records);
    let text = redact_kind(&text, &patterns.phone, "phone", &mut records);
    (text, records)
}

/// Produce a scrubbed copy of a turn for non-canonical adapters.
///
/// Text parts are redacted; tool payloads are passed through their JSON
/// string forms. The scrubbed flag is set and audit hashes land in metadata.
pub fn redact_turn(turn: &Turn) -> Turn {
    let mut records = Vec::new();
    let parts = turn
        .parts
        .iter()
        .map(|part| match part {
            ContentPart::Text { text } => {
                let (scrubbed, mut found) = redact_text(text);
                records.append(&mut found);
                ContentPart::Text { text: scrubbed }
            }
            other => other.clone(),
        })
        .collect();

    let mut scrubbed = Turn {
        parts,
        pii_scrubbed: true,
        ..turn.clone()
    };
    if !records.is_empty() {
        let audit = serde_json::json!({ "redactions": records });
        scrubbed.metadata = match scrubbed.metadata {
            serde_json::Value::Object(mut map) => {
                map.insert("redactions".into(), audit["redactions"].clone());
                serde_json::Value::Object(map)
            }
            _ => audit,
        };
    }
    scrubbed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripsage_core::Role;
    use uuid::Uuid;

    #[test]
    fn test_email_redacted() {
        let (text, records) = redact_text("contact me at ana.silva@example.com please");
        assert!(!text.contains("ana.silva@example.com"));
        assert!(text.contains("[email:"));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, "email");
        assert_eq!(records[0].sha256.len(), 64);
    }

    #[test]
    fn test_card_redacted_before_phone() {
        let (text, records) = redact_text("card 4111 1111 1111 1111 on file");
        assert!(!text.contains("4111"));
        assert_eq!(records[0].kind, "card");
    }

    #[test]
    fn test_phone_redacted() {
        let (text, records) = redact_text("call +351 912 345 678 tomorrow");
        assert!(!text.contains("912 345"));
        assert!(records.iter().any(|r| r.kind == "phone"));
    }

    #[test]
    fn test_clean_text_untouched() {
        let (text, records) = redact_text("a weekend in Lisbon for two");
        assert_eq!(text, "a weekend in Lisbon for two");
        assert!(records.is_empty());
    }

    #[test]
    fn test_redact_turn_sets_flag_and_metadata() {
        let turn = Turn::text(Uuid::new_v4(), Role::User, "email me: bob@example.org");
        let scrubbed = redact_turn(&turn);
        assert!(scrubbed.pii_scrubbed);
        assert!(!scrubbed.text_content().contains("bob@example.org"));
        assert!(scrubbed.metadata["redactions"].is_array());
        // Original untouched
        assert!(turn.text_content().contains("bob@example.org"));
    }

    #[test]
    fn test_same_original_same_token() {
        let (a, _) = redact_text("bob@example.org");
        let (b, _) = redact_text("bob@example.org");
        assert_eq!(a, b);
    }
}
