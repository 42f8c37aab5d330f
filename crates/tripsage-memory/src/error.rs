//! Memory subsystem errors

use thiserror::Error;

/// Error type for memory operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MemoryError {
    /// Canonical store operation failed
    #[error("canonical store failure: {0}")]
    Store(String),

    /// Session does not exist or belongs to another user
    #[error("session not found or not owned by caller")]
    NotOwned,

    /// A non-canonical adapter failed; isolated, never user-facing
    #[error("adapter '{adapter}' failed: {message}")]
    Adapter {
        adapter: String,
        message: String,
    },

    /// Embedding generation failed; the turn stays valid without one
    #[error("embedding generation failed: {0}")]
    Embedding(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MemoryError {
    pub fn store(message: impl Into<String>) -> Self {
        MemoryError::Store(message.into())
    }

    pub fn adapter(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        MemoryError::Adapter {
            adapter: adapter.into(),
            message: message.into(),
        }
    }
}

impl From<MemoryError> for tripsage_core::Error {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::NotOwned => {
                tripsage_core::Error::Forbidden("session not owned by caller".into())
            }
            other => tripsage_core::Error::Internal(other.to_string()),
        }
    }
}

/// Result type alias for memory operations.
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = MemoryError::adapter("cache", "redis timeout");
        assert_eq!(err.to_string(), "adapter 'cache' failed: redis timeout");
    }

    #[test]
    fn test_not_owned_maps_to_forbidden() {
        let core: tripsage_core::Error = MemoryError::NotOwned.into();
        assert_eq!(core.code(), "FORBIDDEN");
    }

    #[test]
    fn test_store_maps_to_internal() {
        let core: tripsage_core::Error = MemoryError::store("connection refused").into();
        assert_eq!(core.code(), "INTERNAL");
    }
}
