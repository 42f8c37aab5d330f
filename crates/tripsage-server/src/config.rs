//! Environment-backed settings
//!
//! All external coordinates come from the environment, validated once at
//! boot. Secrets stay in `SecretString` from the moment they are read.

use secrecy::SecretString;
use std::time::Duration;
use thiserror::Error;

/// Startup configuration error.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {message}")]
    Invalid {
        name: &'static str,
        message: String,
    },
}

/// Per-route sliding-window limits. Semantics are contractual; the numbers
/// are operational tuning.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub chat_per_min: u32,
    pub chat_stream_per_min: u32,
    pub router_per_min: u32,
    pub agents_per_min: u32,
    pub keys_write_per_min: u32,
    pub keys_validate_per_min: u32,
    pub window: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            chat_per_min: 40,
            chat_stream_per_min: 40,
            router_per_min: 60,
            agents_per_min: 40,
            keys_write_per_min: 20,
            keys_validate_per_min: 20,
            window: Duration::from_secs(60),
        }
    }
}

/// Process settings.
#[derive(Clone)]
pub struct Settings {
    pub bind_addr: String,
    /// KV store URL (rate limiting, idempotency)
    pub kv_url: String,
    /// Canonical store URL; absent means in-process store (single node)
    pub database_url: Option<String>,
    /// Gateway fallback credential; absent means BYOK-only
    pub gateway_base_url: Option<String>,
    pub gateway_api_key: Option<SecretString>,
    pub gateway_chat_model: String,
    pub gateway_embedding_model: String,
    /// OpenAI BYOK endpoint override (tests point this at a mock)
    pub openai_base_url: String,
    /// Webhook shared HMAC secret
    pub webhook_secret: SecretString,
    /// Queue signing keys, current and next for rotation
    pub queue_signing_key: SecretString,
    pub queue_signing_key_next: Option<SecretString>,
    pub queue_url: Option<String>,
    /// Session-token signing secret
    pub auth_token_secret: SecretString,
    /// Outbound email provider
    pub email_api_url: Option<String>,
    pub email_api_key: Option<SecretString>,
    /// Backend for the HTTP travel tools
    pub travel_api_base: String,
    pub allowed_origins: Vec<String>,
    pub enable_demo: bool,
    pub rate_limits: RateLimits,
    /// Context retrieval budget per chat turn
    pub context_limit: usize,
    /// Idempotency reservation TTL
    pub idempotency_ttl: Duration,
}

fn optional(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn required(name: &'static str) -> Result<String, SettingsError> {
    optional(name).ok_or(SettingsError::Missing(name))
}

fn parse_limit(name: &'static str, default: u32) -> Result<u32, SettingsError> {
    match optional(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e| SettingsError::Invalid {
            name,
            message: format!("{e}"),
        }),
    }
}

impl Settings {
    /// Load settings from the environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        let defaults = RateLimits::default();
        let rate_limits = RateLimits {
            chat_per_min: parse_limit("RATE_LIMIT_CHAT", defaults.chat_per_min)?,
            chat_stream_per_min: parse_limit("RATE_LIMIT_CHAT_STREAM", defaults.chat_stream_per_min)?,
            router_per_min: parse_limit("RATE_LIMIT_ROUTER", defaults.router_per_min)?,
            agents_per_min: parse_limit("RATE_LIMIT_AGENTS", defaults.agents_per_min)?,
            keys_write_per_min: parse_limit("RATE_LIMIT_KEYS_WRITE", defaults.keys_write_per_min)?,
            keys_validate_per_min: parse_limit(
                "RATE_LIMIT_KEYS_VALIDATE",
                defaults.keys_validate_per_min,
            )?,
            window: defaults.window,
        };

        Ok(Self {
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            kv_url: required("KV_URL")?,
            database_url: optional("DATABASE_URL"),
            gateway_base_url: optional("GATEWAY_BASE_URL"),
            gateway_api_key: optional("GATEWAY_API_KEY").map(SecretString::from),
            gateway_chat_model: optional("GATEWAY_CHAT_MODEL")
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            gateway_embedding_model: optional("GATEWAY_EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            openai_base_url: optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            webhook_secret: SecretString::from(required("WEBHOOK_SECRET")?),
            queue_signing_key: SecretString::from(required("QUEUE_SIGNING_KEY")?),
            queue_signing_key_next: optional("QUEUE_SIGNING_KEY_NEXT").map(SecretString::from),
            queue_url: optional("QUEUE_URL"),
            auth_token_secret: SecretString::from(required("AUTH_TOKEN_SECRET")?),
            email_api_url: optional("EMAIL_API_URL"),
            email_api_key: optional("EMAIL_API_KEY").map(SecretString::from),
            travel_api_base: optional("TRAVEL_API_BASE_URL")
                .unwrap_or_else(|| "https://travel-api.internal".to_string()),
            allowed_origins: optional("ALLOWED_ORIGINS")
                .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
            enable_demo: optional("ENABLE_DEMO").is_some_and(|v| v == "true" || v == "1"),
            rate_limits,
            context_limit: 12,
            idempotency_ttl: Duration::from_secs(300),
        })
    }

    /// Settings for tests: no external coordinates required.
    pub fn for_tests() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".into(),
            kv_url: String::new(),
            database_url: None,
            gateway_base_url: None,
            gateway_api_key: None,
            gateway_chat_model: "test-chat".into(),
            gateway_embedding_model: "test-embed".into(),
            openai_base_url: "https://api.openai.com/v1".into(),
            webhook_secret: SecretString::from("test-webhook-secret"),
            queue_signing_key: SecretString::from("test-queue-key"),
            queue_signing_key_next: None,
            queue_url: None,
            auth_token_secret: SecretString::from("test-auth-secret"),
            email_api_url: None,
            email_api_key: None,
            travel_api_base: "https://travel.example.test".into(),
            allowed_origins: Vec::new(),
            enable_demo: false,
            rate_limits: RateLimits::default(),
            context_limit: 12,
            idempotency_ttl: Duration::from_secs(300),
        }
    }
}
