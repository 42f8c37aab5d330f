//! Job pipeline: change events, queue publishing, side-effect adapters
//!
//! Database change events arrive through the webhook intake, become durable
//! jobs keyed by a deterministic event key, and are consumed by the
//! `/api/jobs/{job}` endpoints with at-least-once semantics. Every side
//! effect is idempotent by event key.

use crate::admission::signature;
use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tripsage_core::{Error, Result};

/// Inbound database change event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub operation: ChangeOperation,
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub record: Option<Value>,
    #[serde(default)]
    pub old_record: Option<Value>,
    pub occurred_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOperation {
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Insert => "INSERT",
            ChangeOperation::Update => "UPDATE",
            ChangeOperation::Delete => "DELETE",
        }
    }
}

impl ChangeEvent {
    /// Identity of the affected record: its `id` when present, otherwise the
    /// whole record serialization (deterministic either way).
    fn record_identity(&self) -> String {
        let record = self.record.as_ref().or(self.old_record.as_ref());
        match record {
            Some(value) => value
                .get("id")
                .and_then(|id| id.as_str().map(String::from))
                .unwrap_or_else(|| value.to_string()),
            None => String::new(),
        }
    }

    /// Deterministic event key: `sha256(table || op || occurred_at || identity)`.
    pub fn event_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.table.as_bytes());
        hasher.update(self.operation.as_str().as_bytes());
        hasher.update(self.occurred_at.as_bytes());
        hasher.update(self.record_identity().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Envelope published to the queue and delivered to consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub event_key: String,
    pub payload: ChangeEvent,
}

/// Durable at-least-once publisher. Retry/backoff and the dead-letter queue
/// are the queue provider's configuration; the contract here is only that
/// the payload is handed off durably.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    async fn publish(&self, job: &str, envelope: &JobEnvelope) -> Result<()>;
}

/// Shared publisher handle.
pub type PublisherHandle = Arc<dyn QueuePublisher>;

/// HTTP publisher signing each body with the current queue key.
pub struct HttpQueuePublisher {
    http: reqwest::Client,
    base_url: String,
    signing_key: SecretString,
}

impl HttpQueuePublisher {
    pub fn new(http: reqwest::Client, base_url: String, signing_key: SecretString) -> Self {
        Self {
            http,
            base_url,
            signing_key,
        }
    }
}

#[async_trait]
impl QueuePublisher for HttpQueuePublisher {
    async fn publish(&self, job: &str, envelope: &JobEnvelope) -> Result<()> {
        let body = serde_json::to_vec(envelope)
            .map_err(|e| Error::internal(format!("job serialization failed: {e}")))?;
        let signature = signature::sign(&self.signing_key, &body);
        let response = self
            .http
            .post(format!("{}/{job}", self.base_url))
            .header(signature::QUEUE_SIGNATURE_HEADER, signature)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("queue publish failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::ProviderUnavailable(format!(
                "queue returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// In-process publisher recording envelopes; used by tests and by demo mode
/// where no queue provider is configured.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, JobEnvelope)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, JobEnvelope)> {
        self.published.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.published.lock().len()
    }
}

#[async_trait]
impl QueuePublisher for RecordingPublisher {
    async fn publish(&self, job: &str, envelope: &JobEnvelope) -> Result<()> {
        self.published
            .lock()
            .push((job.to_string(), envelope.clone()));
        Ok(())
    }
}

/// Transactional email side effect.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// Shared mailer handle.
pub type MailerHandle = Arc<dyn Mailer>;

/// Email provider over HTTPS.
pub struct HttpMailer {
    http: reqwest::Client,
    api_url: String,
    api_key: SecretString,
}

impl HttpMailer {
    pub fn new(http: reqwest::Client, api_url: String, api_key: SecretString) -> Self {
        Self {
            http,
            api_url,
            api_key,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&serde_json::json!({"to": to, "subject": subject, "body": body}))
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("email send failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::ProviderUnavailable(format!(
                "email provider returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Mailer double counting observable side effects.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
        self.sent.lock().push((to.to_string(), subject.to_string()));
        Ok(())
    }
}
