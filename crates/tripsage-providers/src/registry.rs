//! Provider registry
//!
//! Resolves a user-scoped model handle: a BYOK credential from the vault
//! wins, the platform gateway is the fallback, and neither yields
//! `NoProviderAvailable`. Initialized once at process boot and shared.

use crate::gateway::{
    probe_credential, OpenAiCompatibleEmbeddings, OpenAiCompatibleModel, ProviderEndpoint,
};
use crate::vault::VaultHandle;
use secrecy::SecretString;
use serde::Serialize;
use std::sync::Arc;
use tracing::{instrument, warn};
use tripsage_core::{EmbeddingsHandle, Error, ModelHandle, Result, WorkflowKind};

/// A BYOK-capable provider the platform knows how to talk to.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Service identifier users register keys under (e.g. "openai")
    pub name: String,
    pub base_url: String,
    pub default_model: String,
}

/// Platform fallback gateway credential.
#[derive(Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub chat_model: String,
    pub embedding_model: String,
}

/// Result of probing a credential.
#[derive(Debug, Clone, Serialize)]
pub struct KeyValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Process-wide model resolution.
pub struct ProviderRegistry {
    vault: VaultHandle,
    http: reqwest::Client,
    /// BYOK services in resolution preference order
    services: Vec<ServiceConfig>,
    gateway: Option<GatewayConfig>,
}

impl ProviderRegistry {
    pub fn new(
        vault: VaultHandle,
        http: reqwest::Client,
        services: Vec<ServiceConfig>,
        gateway: Option<GatewayConfig>,
    ) -> Self {
        Self {
            vault,
            http,
            services,
            gateway,
        }
    }

    /// Whether `service` is a known BYOK target.
    pub fn knows_service(&self, service: &str) -> bool {
        self.services.iter().any(|s| s.name == service)
    }

    fn service(&self, name: &str) -> Result<&ServiceConfig> {
        self.services
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::invalid_input(format!("unknown provider service '{name}'")))
    }

    /// Resolve a model handle for `user_id`.
    ///
    /// The workflow hint is recorded for telemetry; model choice is the
    /// resolved provider's default. A vault outage degrades to the gateway
    /// rather than failing the request.
    #[instrument(skip(self), fields(workflow = workflow_hint.map(|w| w.as_str())))]
    pub async fn resolve(
        &self,
        user_id: &str,
        workflow_hint: Option<WorkflowKind>,
    ) -> Result<ModelHandle> {
        for service in &self.services {
            match self.vault.get(user_id, &service.name).await {
                Ok(Some(key)) => {
                    let endpoint = ProviderEndpoint {
                        provider: service.name.clone(),
                        base_url: service.base_url.clone(),
                        api_key: key,
                    };
                    let model = OpenAiCompatibleModel::new(
                        self.http.clone(),
                        endpoint,
                        service.default_model.clone(),
                    );
                    return Ok(Arc::new(model) as ModelHandle);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(service = %service.name, error = %err, "vault read failed, trying fallback");
                }
            }
        }
        self.gateway_model()
    }

    /// The fallback gateway model, independent of user credentials.
    pub fn gateway_model(&self) -> Result<ModelHandle> {
        let gateway = self.gateway.as_ref().ok_or(Error::NoProviderAvailable)?;
        let endpoint = ProviderEndpoint {
            provider: "gateway".to_string(),
            base_url: gateway.base_url.clone(),
            api_key: gateway.api_key.clone(),
        };
        Ok(Arc::new(OpenAiCompatibleModel::new(
            self.http.clone(),
            endpoint,
            gateway.chat_model.clone(),
        )) as ModelHandle)
    }

    /// Embedding provider (always the platform gateway; embeddings are not
    /// BYOK-scoped).
    pub fn embeddings(&self) -> Result<EmbeddingsHandle> {
        let gateway = self.gateway.as_ref().ok_or(Error::NoProviderAvailable)?;
        let endpoint = ProviderEndpoint {
            provider: "gateway".to_string(),
            base_url: gateway.base_url.clone(),
            api_key: gateway.api_key.clone(),
        };
        Ok(Arc::new(OpenAiCompatibleEmbeddings::new(
            self.http.clone(),
            endpoint,
            gateway.embedding_model.clone(),
        )) as EmbeddingsHandle)
    }

    /// Register or replace a BYOK credential after probing it.
    pub async fn register_key(&self, user_id: &str, service: &str, key: SecretString) -> Result<()> {
        let config = self.service(service)?;
        probe_credential(&self.http, &config.base_url, service, &key).await?;
        self.vault.put(user_id, service, key).await
    }

    /// Revoke a BYOK credential.
    pub async fn revoke_key(&self, user_id: &str, service: &str) -> Result<()> {
        let _ = self.service(service)?;
        self.vault.delete(user_id, service).await
    }

    /// Probe a credential without persisting it.
    pub async fn validate(&self, service: &str, key: &SecretString) -> Result<KeyValidation> {
        let config = self.service(service)?;
        match probe_credential(&self.http, &config.base_url, service, key).await {
            Ok(()) => Ok(KeyValidation {
                valid: true,
                reason: None,
            }),
            Err(Error::InvalidKey(_)) => Ok(KeyValidation {
                valid: false,
                reason: Some("provider rejected credential".to_string()),
            }),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::{CredentialVault, InMemoryVault};

    fn registry_with(vault: Arc<InMemoryVault>, gateway: bool) -> ProviderRegistry {
        ProviderRegistry::new(
            vault,
            reqwest::Client::new(),
            vec![ServiceConfig {
                name: "openai".into(),
                base_url: "https://api.example.test/v1".into(),
                default_model: "gpt-test".into(),
            }],
            gateway.then(|| GatewayConfig {
                base_url: "https://gateway.example.test/v1".into(),
                api_key: SecretString::from("gw-key"),
                chat_model: "gateway-chat".into(),
                embedding_model: "gateway-embed".into(),
            }),
        )
    }

    #[tokio::test]
    async fn test_resolve_prefers_byok() {
        let vault = Arc::new(InMemoryVault::new());
        vault
            .put("u1", "openai", SecretString::from("sk-byok"))
            .await
            .unwrap();
        let registry = registry_with(Arc::clone(&vault), true);
        let handle = registry.resolve("u1", None).await.unwrap();
        assert_eq!(handle.provider(), "openai");
        assert_eq!(handle.model(), "gpt-test");
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_gateway() {
        let vault = Arc::new(InMemoryVault::new());
        let registry = registry_with(vault, true);
        let handle = registry.resolve("u1", None).await.unwrap();
        assert_eq!(handle.provider(), "gateway");
        assert_eq!(handle.model(), "gateway-chat");
    }

    #[tokio::test]
    async fn test_resolve_without_any_provider_fails() {
        let vault = Arc::new(InMemoryVault::new());
        let registry = registry_with(vault, false);
        let err = match registry.resolve("u1", None).await {
            Ok(_) => panic!("expected resolve to fail"),
            Err(e) => e,
        };
        assert_eq!(err.code(), "PROVIDER_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_revoked_key_no_longer_resolves() {
        let vault = Arc::new(InMemoryVault::new());
        vault
            .put("u1", "openai", SecretString::from("sk-byok"))
            .await
            .unwrap();
        let registry = registry_with(Arc::clone(&vault), true);
        registry.revoke_key("u1", "openai").await.unwrap();
        let handle = registry.resolve("u1", None).await.unwrap();
        assert_eq!(handle.provider(), "gateway");
    }

    #[tokio::test]
    async fn test_validate_unknown_service_is_invalid_input() {
        let vault = Arc::new(InMemoryVault::new());
        let registry = registry_with(vault, true);
        let err = registry
            .validate("mystery", &SecretString::from("sk-x"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
