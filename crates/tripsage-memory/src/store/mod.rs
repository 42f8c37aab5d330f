//! Canonical session store
//!
//! The authoritative relational+vector store for sessions, turns, and
//! embeddings. Ownership is enforced here, at the storage boundary: every
//! operation takes the calling user and refuses rows owned by anyone else.

mod in_memory;
mod postgres;

pub use in_memory::{InMemoryStore, IndexParams};
pub use postgres::PostgresStore;

use crate::error::MemoryResult;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tripsage_core::Turn;
use uuid::Uuid;

/// A turn scored by cosine similarity to a query vector.
#[derive(Debug, Clone)]
pub struct ScoredTurn {
    pub turn: Turn,
    pub similarity: f32,
}

/// Canonical store operations.
///
/// Turns are append-only: the only permitted update is a dedup merge, which
/// touches `updated_at` and metadata but never content, role, or timestamps
/// of creation.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create the session on first use; verify ownership on every later call.
    async fn ensure_session(&self, user_id: &str, session_id: Uuid) -> MemoryResult<()>;

    /// Tombstone a session. Turns stay for audit.
    async fn soft_delete_session(&self, user_id: &str, session_id: Uuid) -> MemoryResult<()>;

    /// Record a sync point (`last_synced_at`).
    async fn touch_session(&self, user_id: &str, session_id: Uuid) -> MemoryResult<()>;

    /// Exact-hash dedup probe within a session.
    async fn find_turn_by_hash(
        &self,
        user_id: &str,
        session_id: Uuid,
        content_hash: &str,
    ) -> MemoryResult<Option<Turn>>;

    /// Append a new turn.
    async fn insert_turn(&self, user_id: &str, turn: &Turn, content_hash: &str)
        -> MemoryResult<Turn>;

    /// Dedup merge: bump `updated_at`, merge metadata, return the turn.
    async fn merge_turn(
        &self,
        user_id: &str,
        session_id: Uuid,
        turn_id: Uuid,
        metadata: &Value,
    ) -> MemoryResult<Turn>;

    /// The most recent `limit` turns, oldest first.
    async fn recent_turns(
        &self,
        user_id: &str,
        session_id: Uuid,
        limit: usize,
    ) -> MemoryResult<Vec<Turn>>;

    /// Nearest-neighbour turns by embedding within a session.
    async fn similar_turns(
        &self,
        user_id: &str,
        session_id: Uuid,
        embedding: &[f32],
        k: usize,
    ) -> MemoryResult<Vec<ScoredTurn>>;

    /// Turns eligible for embedding that have none yet.
    async fn turns_missing_embedding(
        &self,
        user_id: &str,
        session_id: Uuid,
    ) -> MemoryResult<Vec<Turn>>;

    /// Store the embedding for a turn. At most one embedding per turn; a
    /// second write for the same turn is a no-op.
    async fn store_embedding(
        &self,
        user_id: &str,
        session_id: Uuid,
        turn_id: Uuid,
        embedding: &[f32],
        model: &str,
    ) -> MemoryResult<()>;
}

/// Shared store handle.
pub type StoreHandle = Arc<dyn SessionStore>;
