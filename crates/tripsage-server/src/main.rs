//! TripSage server binary
//!
//! Boot order: settings, KV, canonical store, providers, memory, tools,
//! admission, router assembly, serve. Singletons initialize once here and
//! live for the process lifetime.

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use tripsage_memory::{
    CanonicalStoreAdapter, InMemoryStore, MemoryOrchestrator, PostgresStore, RedisCacheAdapter,
    StoreHandle,
};
use tripsage_providers::{
    GatewayConfig, InMemoryVault, PostgresVault, ProviderRegistry, ServiceConfig, VaultHandle,
};
use tripsage_server::admission::auth::TokenVerifier;
use tripsage_server::admission::Admission;
use tripsage_server::config::Settings;
use tripsage_server::jobs::{
    HttpMailer, HttpQueuePublisher, MailerHandle, PublisherHandle, RecordingMailer,
    RecordingPublisher,
};
use tripsage_server::kv::RedisKv;
use tripsage_server::state::AppState;
use tripsage_server::tools::register_default_tools;
use tripsage_server::{create_router, state::ModelResolver};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env().context("loading settings")?;
    let http = reqwest::Client::new();

    // External KV: rate limiting and idempotency cannot run without it.
    let kv = Arc::new(
        RedisKv::connect(&settings.kv_url)
            .await
            .context("connecting to KV store")?,
    );

    // Canonical store; in-process fallback for single-node deployments.
    let (store, vault): (StoreHandle, VaultHandle) = match &settings.database_url {
        Some(url) => {
            let (client, connection) = tokio_postgres::connect(url, tokio_postgres::NoTls)
                .await
                .context("connecting to canonical store")?;
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    tracing::error!(error = %err, "canonical store connection ended");
                }
            });
            let client = Arc::new(client);
            let store = PostgresStore::new(Arc::clone(&client));
            store.init_schema().await.context("initializing schema")?;
            (
                Arc::new(store) as StoreHandle,
                Arc::new(PostgresVault::new(client)) as VaultHandle,
            )
        }
        None => {
            warn!("DATABASE_URL not set; using in-process store and vault");
            (
                Arc::new(InMemoryStore::default()) as StoreHandle,
                Arc::new(InMemoryVault::new()) as VaultHandle,
            )
        }
    };

    // Provider registry: BYOK services plus the optional gateway fallback.
    let services = vec![ServiceConfig {
        name: "openai".into(),
        base_url: settings.openai_base_url.clone(),
        default_model: "gpt-4o".into(),
    }];
    let gateway = match (&settings.gateway_base_url, &settings.gateway_api_key) {
        (Some(base_url), Some(api_key)) => Some(GatewayConfig {
            base_url: base_url.clone(),
            api_key: api_key.clone(),
            chat_model: settings.gateway_chat_model.clone(),
            embedding_model: settings.gateway_embedding_model.clone(),
        }),
        _ => None,
    };
    let providers = Arc::new(ProviderRegistry::new(
        vault,
        http.clone(),
        services,
        gateway,
    ));

    // Memory: canonical adapter first, then the redis cache when available.
    let embeddings = providers.embeddings().ok();
    if embeddings.is_none() {
        warn!("no gateway configured; turns will commit without embeddings");
    }
    let mut adapters: Vec<tripsage_memory::AdapterHandle> = vec![Arc::new(
        CanonicalStoreAdapter::new(Arc::clone(&store), embeddings),
    )];
    match redis::Client::open(settings.kv_url.as_str()) {
        Ok(client) => match client.get_multiplexed_tokio_connection().await {
            Ok(connection) => adapters.push(Arc::new(RedisCacheAdapter::new(connection))),
            Err(err) => warn!(error = %err, "cache adapter disabled: redis connect failed"),
        },
        Err(err) => warn!(error = %err, "cache adapter disabled: invalid redis url"),
    }
    let memory = Arc::new(MemoryOrchestrator::new(adapters));

    // Tool registry.
    let mut tools = tripsage_core::ToolRegistry::new();
    register_default_tools(
        &mut tools,
        http.clone(),
        &settings.travel_api_base,
        Arc::clone(&memory),
    );

    // Admission guard.
    let admission = Admission::new(
        kv.clone(),
        TokenVerifier::new(settings.auth_token_secret.clone()),
        settings.webhook_secret.clone(),
        settings.queue_signing_key.clone(),
        settings.queue_signing_key_next.clone(),
        settings.rate_limits,
        settings.idempotency_ttl,
    );

    // Job pipeline.
    let publisher: PublisherHandle = match &settings.queue_url {
        Some(url) => Arc::new(HttpQueuePublisher::new(
            http.clone(),
            url.clone(),
            settings.queue_signing_key.clone(),
        )),
        None => {
            warn!("QUEUE_URL not set; jobs are recorded in-process only");
            Arc::new(RecordingPublisher::new())
        }
    };
    let mailer: MailerHandle = match (&settings.email_api_url, &settings.email_api_key) {
        (Some(url), Some(key)) => Arc::new(HttpMailer::new(http.clone(), url.clone(), key.clone())),
        _ => {
            warn!("email provider not configured; notifications are recorded only");
            Arc::new(RecordingMailer::new())
        }
    };

    let bind_addr = settings.bind_addr.clone();
    let resolver: Arc<dyn ModelResolver> = Arc::clone(&providers) as _;
    let state = AppState::new(
        settings,
        admission,
        resolver,
        Some(providers),
        tools,
        memory,
        kv,
        publisher,
        mailer,
    );

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!(addr = %bind_addr, "tripsage server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "shutdown signal listener failed");
    }
}
