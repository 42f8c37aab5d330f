//! Redis recent-turn cache adapter
//!
//! Keeps a short per-session list of recent turns in Redis for cheap warm
//! reads, with a TTL so idle sessions age out. Never canonical: content
//! arriving here has already been redacted by the orchestrator.

use super::MemoryAdapter;
use crate::error::{MemoryError, MemoryResult};
use crate::intent::{AdapterOutcome, MemoryIntent};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::sync::RwLock;
use tripsage_core::Turn;
use uuid::Uuid;

const DEFAULT_KEY_PREFIX: &str = "memory:recent:";
const DEFAULT_MAX_TURNS: isize = 50;
const DEFAULT_TTL_SECS: i64 = 86_400;

/// Queue/cache adapter over Redis lists.
pub struct RedisCacheAdapter {
    connection: Arc<RwLock<MultiplexedConnection>>,
    key_prefix: String,
    max_turns: isize,
    ttl_secs: i64,
}

impl RedisCacheAdapter {
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self {
            connection: Arc::new(RwLock::new(connection)),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_ttl_secs(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    fn key(&self, session_id: Uuid) -> String {
        format!("{}{}", self.key_prefix, session_id)
    }

    fn map_err(err: redis::RedisError) -> MemoryError {
        MemoryError::adapter("cache", err.to_string())
    }

    async fn push_turn(&self, session_id: Uuid, turn: &Turn) -> MemoryResult<()> {
        let key = self.key(session_id);
        let payload = serde_json::to_string(turn)?;
        let mut connection = self.connection.write().await;
        let () = connection
            .lpush(&key, payload)
            .await
            .map_err(Self::map_err)?;
        let () = connection
            .ltrim(&key, 0, self.max_turns - 1)
            .await
            .map_err(Self::map_err)?;
        let () = connection
            .expire(&key, self.ttl_secs)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn invalidate(&self, session_id: Uuid) -> MemoryResult<()> {
        let key = self.key(session_id);
        let mut connection = self.connection.write().await;
        let () = connection.del(&key).await.map_err(Self::map_err)?;
        Ok(())
    }
}

#[async_trait]
impl MemoryAdapter for RedisCacheAdapter {
    fn name(&self) -> &str {
        "cache"
    }

    fn supports(&self, intent: &MemoryIntent) -> bool {
        matches!(
            intent,
            MemoryIntent::TurnCommitted { .. } | MemoryIntent::SyncSession { .. }
        )
    }

    async fn handle(&self, intent: &MemoryIntent) -> MemoryResult<AdapterOutcome> {
        match intent {
            MemoryIntent::TurnCommitted {
                session_id, turn, ..
            } => {
                self.push_turn(*session_id, turn).await?;
                Ok(AdapterOutcome::Done)
            }
            MemoryIntent::SyncSession { session_id, .. } => {
                // Drop the cached window; it rebuilds from canonical reads.
                self.invalidate(*session_id).await?;
                Ok(AdapterOutcome::Done)
            }
            _ => Ok(AdapterOutcome::Done),
        }
    }
}
