//! Memory intents
//!
//! The orchestrator's single entry point receives one of these tagged
//! intents and fans it out to adapters. A closed enum keeps adapter
//! `supports` checks exhaustive.

use serde::{Deserialize, Serialize};
use tripsage_core::Turn;
use uuid::Uuid;

/// A request to the memory subsystem.
#[derive(Debug, Clone)]
pub enum MemoryIntent {
    /// Persist a freshly committed turn and, if applicable, embed it
    TurnCommitted {
        session_id: Uuid,
        user_id: String,
        turn: Turn,
    },
    /// Bring derived state (embeddings, cache) into agreement with the store
    SyncSession { session_id: Uuid, user_id: String },
    /// Generate embeddings for historical turns missing one
    BackfillSession { session_id: Uuid, user_id: String },
    /// Return the most relevant prior turns for a new prompt
    FetchContext {
        session_id: Uuid,
        user_id: String,
        limit: usize,
        /// The new prompt, when available, for the semantic half of retrieval
        query: Option<String>,
    },
}

impl MemoryIntent {
    pub fn kind(&self) -> IntentKind {
        match self {
            MemoryIntent::TurnCommitted { .. } => IntentKind::TurnCommitted,
            MemoryIntent::SyncSession { .. } => IntentKind::SyncSession,
            MemoryIntent::BackfillSession { .. } => IntentKind::BackfillSession,
            MemoryIntent::FetchContext { .. } => IntentKind::FetchContext,
        }
    }

    pub fn session_id(&self) -> Uuid {
        match self {
            MemoryIntent::TurnCommitted { session_id, .. }
            | MemoryIntent::SyncSession { session_id, .. }
            | MemoryIntent::BackfillSession { session_id, .. }
            | MemoryIntent::FetchContext { session_id, .. } => *session_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            MemoryIntent::TurnCommitted { user_id, .. }
            | MemoryIntent::SyncSession { user_id, .. }
            | MemoryIntent::BackfillSession { user_id, .. }
            | MemoryIntent::FetchContext { user_id, .. } => user_id,
        }
    }
}

/// Intent discriminant, used for adapter support declarations and telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    TurnCommitted,
    SyncSession,
    BackfillSession,
    FetchContext,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::TurnCommitted => "turn_committed",
            IntentKind::SyncSession => "sync_session",
            IntentKind::BackfillSession => "backfill_session",
            IntentKind::FetchContext => "fetch_context",
        }
    }
}

/// Result of committing a turn through the canonical adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    /// The surviving turn identifier (existing one on a dedup merge)
    pub turn_id: Uuid,
    /// Whether the commit coalesced into an existing turn
    pub deduplicated: bool,
    /// Whether an embedding was stored for the turn
    pub embedded: bool,
}

/// What one adapter produced for an intent.
#[derive(Debug, Clone)]
pub enum AdapterOutcome {
    Committed(CommitOutcome),
    Context(Vec<Turn>),
    Synced { embedded: usize },
    Backfilled { embedded: usize },
    /// The adapter handled the intent with nothing to report
    Done,
}
