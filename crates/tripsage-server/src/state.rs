//! Shared application state
//!
//! Read-mostly singletons assembled once at boot: provider resolution, the
//! tool registry, the tool-loop engine, the memory orchestrator, admission,
//! and the job pipeline handles.

use crate::admission::Admission;
use crate::config::Settings;
use crate::jobs::{MailerHandle, PublisherHandle};
use crate::kv::KvHandle;
use async_trait::async_trait;
use std::sync::Arc;
use tripsage_core::{
    AgentRouter, ModelHandle, Result, ToolLoopEngine, ToolRegistry, WorkflowKind,
};
use tripsage_memory::MemoryOrchestrator;
use tripsage_providers::ProviderRegistry;

/// Model resolution seam between handlers and the provider registry, so the
/// streaming stack is testable with scripted models.
#[async_trait]
pub trait ModelResolver: Send + Sync {
    async fn resolve(&self, user_id: &str, hint: Option<WorkflowKind>) -> Result<ModelHandle>;
}

#[async_trait]
impl ModelResolver for ProviderRegistry {
    async fn resolve(&self, user_id: &str, hint: Option<WorkflowKind>) -> Result<ModelHandle> {
        ProviderRegistry::resolve(self, user_id, hint).await
    }
}

/// A resolver that always returns the same model (tests, demo mode).
pub struct FixedResolver {
    model: ModelHandle,
}

impl FixedResolver {
    pub fn new(model: ModelHandle) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ModelResolver for FixedResolver {
    async fn resolve(&self, _user_id: &str, _hint: Option<WorkflowKind>) -> Result<ModelHandle> {
        Ok(Arc::clone(&self.model))
    }
}

/// Process-wide state shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub admission: Arc<Admission>,
    pub resolver: Arc<dyn ModelResolver>,
    /// Present when BYOK key management is configured
    pub providers: Option<Arc<ProviderRegistry>>,
    pub tools: Arc<ToolRegistry>,
    pub engine: ToolLoopEngine,
    pub router: AgentRouter,
    pub memory: Arc<MemoryOrchestrator>,
    pub kv: KvHandle,
    pub publisher: PublisherHandle,
    pub mailer: MailerHandle,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        admission: Admission,
        resolver: Arc<dyn ModelResolver>,
        providers: Option<Arc<ProviderRegistry>>,
        tools: ToolRegistry,
        memory: Arc<MemoryOrchestrator>,
        kv: KvHandle,
        publisher: PublisherHandle,
        mailer: MailerHandle,
    ) -> Self {
        let tools = Arc::new(tools);
        Self {
            settings: Arc::new(settings),
            admission: Arc::new(admission),
            resolver,
            providers,
            engine: ToolLoopEngine::new(Arc::clone(&tools)),
            tools,
            router: AgentRouter::new(),
            memory,
            kv,
            publisher,
            mailer,
        }
    }
}
