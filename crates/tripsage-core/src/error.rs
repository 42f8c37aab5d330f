//! Error types shared across the TripSage runtime
//!
//! Every error carries a stable machine-readable code (see [`Error::code`])
//! that surfaces unchanged in API error envelopes and stream `error` events.

use thiserror::Error;

/// Core error type for the agent runtime.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No valid identity on the request
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Identity lacks access to the target resource
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Sliding-window budget exhausted
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the window rolls over
        retry_after_secs: u64,
    },

    /// Request body or tool input failed schema validation
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Human-readable summary
        message: String,
        /// Per-field validation details
        details: Option<serde_json::Value>,
    },

    /// Event key already reserved; treated as success with `duplicate: true`
    #[error("duplicate event: {0}")]
    IdempotentDuplicate(String),

    /// Model provider or external service failed or timed out
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Tool exceeded its declared timeout
    #[error("tool '{tool}' timed out after {timeout_ms}ms")]
    ToolTimeout {
        /// Tool name
        tool: String,
        /// Declared budget in milliseconds
        timeout_ms: u64,
    },

    /// Tool input or output failed its schema
    #[error("tool '{tool}' validation failed: {message}")]
    ToolValidation {
        /// Tool name
        tool: String,
        /// Validation failure summary
        message: String,
    },

    /// Tool execution failed in a way the model may recover from
    #[error("tool '{tool}' failed: {message}")]
    ToolExecution {
        /// Tool name
        tool: String,
        /// Failure summary
        message: String,
        /// Whether the loop must terminate rather than continue
        stop_worthy: bool,
    },

    /// BYOK credential store unreachable
    #[error("credential vault unavailable: {0}")]
    VaultUnavailable(String),

    /// Provider rejected the credential on validation
    #[error("invalid credential for service '{0}'")]
    InvalidKey(String),

    /// No BYOK credential and no fallback gateway configured
    #[error("no model provider available for user")]
    NoProviderAvailable,

    /// Tool-call ceiling or deadline reached before a final message
    #[error("stop policy exhausted: {0}")]
    StopPolicyExhausted(String),

    /// Unclassified failure; logged with a correlation identifier
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for the error envelope and stream events.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::InvalidInput { .. } => "INVALID_INPUT",
            Error::IdempotentDuplicate(_) => "IDEMPOTENT_DUPLICATE",
            Error::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            Error::ToolTimeout { .. } => "TOOL_TIMEOUT",
            Error::ToolValidation { .. } => "TOOL_VALIDATION",
            Error::ToolExecution { .. } => "TOOL_EXECUTION",
            Error::VaultUnavailable(_) => "VAULT_UNAVAILABLE",
            Error::InvalidKey(_) => "INVALID_KEY",
            Error::NoProviderAvailable => "PROVIDER_UNAVAILABLE",
            Error::StopPolicyExhausted(_) => "STOP_POLICY_EXHAUSTED",
            Error::Internal(_) => "INTERNAL",
        }
    }

    /// Invalid-input error without per-field details.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput {
            message: message.into(),
            details: None,
        }
    }

    /// Invalid-input error carrying per-field details.
    pub fn invalid_input_with_details(
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Error::InvalidInput {
            message: message.into(),
            details: Some(details),
        }
    }

    /// Recoverable tool failure; the model decides whether to continue.
    pub fn tool_error(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ToolExecution {
            tool: tool.into(),
            message: message.into(),
            stop_worthy: false,
        }
    }

    /// Unrecoverable tool failure classified as stop-worthy.
    pub fn tool_fatal(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ToolExecution {
            tool: tool.into(),
            message: message.into(),
            stop_worthy: true,
        }
    }

    /// Whether the tool-loop must terminate on this error.
    pub fn is_stop_worthy(&self) -> bool {
        matches!(
            self,
            Error::ToolExecution {
                stop_worthy: true,
                ..
            }
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::Unauthorized("x".into()).code(), "UNAUTHORIZED");
        assert_eq!(
            Error::RateLimited {
                retry_after_secs: 3
            }
            .code(),
            "RATE_LIMITED"
        );
        assert_eq!(Error::invalid_input("bad").code(), "INVALID_INPUT");
        assert_eq!(Error::NoProviderAvailable.code(), "PROVIDER_UNAVAILABLE");
        assert_eq!(
            Error::StopPolicyExhausted("ceiling".into()).code(),
            "STOP_POLICY_EXHAUSTED"
        );
    }

    #[test]
    fn test_tool_timeout_display() {
        let err = Error::ToolTimeout {
            tool: "flight_search".into(),
            timeout_ms: 2500,
        };
        assert_eq!(err.to_string(), "tool 'flight_search' timed out after 2500ms");
        assert_eq!(err.code(), "TOOL_TIMEOUT");
    }

    #[test]
    fn test_stop_worthy_classification() {
        assert!(!Error::tool_error("t", "soft").is_stop_worthy());
        assert!(Error::tool_fatal("t", "hard").is_stop_worthy());
        assert!(!Error::internal("x").is_stop_worthy());
    }

    #[test]
    fn test_invalid_input_details_carried() {
        let err = Error::invalid_input_with_details(
            "schema mismatch",
            serde_json::json!({"field": "messages"}),
        );
        match err {
            Error::InvalidInput { details, .. } => {
                assert_eq!(details.unwrap()["field"], "messages");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
