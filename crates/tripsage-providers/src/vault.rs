//! BYOK credential vault
//!
//! Credentials are encrypted at rest by the vault itself; this module only
//! ever sees them as [`SecretString`] and never logs or serializes them.
//! Vault reads run server-side under a service-role connection, mediated by
//! stored procedures that check the caller's role.

use async_trait::async_trait;
use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tripsage_core::{Error, Result};

/// Read/write access to per-user provider credentials.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// Fetch the credential for `(user_id, service)`, if registered.
    async fn get(&self, user_id: &str, service: &str) -> Result<Option<SecretString>>;

    /// Register or replace a credential.
    async fn put(&self, user_id: &str, service: &str, key: SecretString) -> Result<()>;

    /// Revoke a credential. Revoking an absent credential is not an error.
    async fn delete(&self, user_id: &str, service: &str) -> Result<()>;
}

/// Shared vault handle.
pub type VaultHandle = Arc<dyn CredentialVault>;

/// In-process vault for tests and single-node development.
#[derive(Default)]
pub struct InMemoryVault {
    entries: DashMap<(String, String), SecretString>,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialVault for InMemoryVault {
    async fn get(&self, user_id: &str, service: &str) -> Result<Option<SecretString>> {
        Ok(self
            .entries
            .get(&(user_id.to_string(), service.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn put(&self, user_id: &str, service: &str, key: SecretString) -> Result<()> {
        self.entries
            .insert((user_id.to_string(), service.to_string()), key);
        Ok(())
    }

    async fn delete(&self, user_id: &str, service: &str) -> Result<()> {
        self.entries
            .remove(&(user_id.to_string(), service.to_string()));
        Ok(())
    }
}

/// Vault backed by stored procedures in the canonical store.
///
/// The connection uses the service-role identity; the procedures themselves
/// enforce that only this role may decrypt.
pub struct PostgresVault {
    client: Arc<tokio_postgres::Client>,
}

impl PostgresVault {
    pub fn new(client: Arc<tokio_postgres::Client>) -> Self {
        Self { client }
    }

    fn unavailable(err: tokio_postgres::Error) -> Error {
        Error::VaultUnavailable(err.to_string())
    }
}

#[async_trait]
impl CredentialVault for PostgresVault {
    async fn get(&self, user_id: &str, service: &str) -> Result<Option<SecretString>> {
        let row = self
            .client
            .query_opt(
                "SELECT vault.get_provider_key($1, $2)",
                &[&user_id, &service],
            )
            .await
            .map_err(Self::unavailable)?;
        Ok(row
            .and_then(|row| row.get::<_, Option<String>>(0))
            .map(SecretString::from))
    }

    async fn put(&self, user_id: &str, service: &str, key: SecretString) -> Result<()> {
        self.client
            .execute(
                "SELECT vault.put_provider_key($1, $2, $3)",
                &[&user_id, &service, &key.expose_secret()],
            )
            .await
            .map_err(Self::unavailable)?;
        Ok(())
    }

    async fn delete(&self, user_id: &str, service: &str) -> Result<()> {
        self.client
            .execute(
                "SELECT vault.delete_provider_key($1, $2)",
                &[&user_id, &service],
            )
            .await
            .map_err(Self::unavailable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let vault = InMemoryVault::new();
        vault
            .put("u1", "openai", SecretString::from("sk-test"))
            .await
            .unwrap();
        let key = vault.get("u1", "openai").await.unwrap().unwrap();
        assert_eq!(key.expose_secret(), "sk-test");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let vault = InMemoryVault::new();
        vault.delete("u1", "openai").await.unwrap();
        vault
            .put("u1", "openai", SecretString::from("sk-test"))
            .await
            .unwrap();
        vault.delete("u1", "openai").await.unwrap();
        assert!(vault.get("u1", "openai").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keys_are_scoped_per_user_and_service() {
        let vault = InMemoryVault::new();
        vault
            .put("u1", "openai", SecretString::from("sk-a"))
            .await
            .unwrap();
        assert!(vault.get("u2", "openai").await.unwrap().is_none());
        assert!(vault.get("u1", "anthropic").await.unwrap().is_none());
    }

    #[test]
    fn test_secret_debug_does_not_leak() {
        let key = SecretString::from("sk-super-secret");
        let debug = format!("{key:?}");
        assert!(!debug.contains("sk-super-secret"));
    }
}
