//! Memory adapters
//!
//! Each adapter declares which intents it handles; the orchestrator invokes
//! supported adapters sequentially, canonical first. Only the canonical
//! adapter may see unredacted content.

mod cache;
mod canonical;

pub use cache::RedisCacheAdapter;
pub use canonical::CanonicalStoreAdapter;

use crate::error::MemoryResult;
use crate::intent::{AdapterOutcome, MemoryIntent};
use async_trait::async_trait;
use std::sync::Arc;

/// A pluggable memory backend.
#[async_trait]
pub trait MemoryAdapter: Send + Sync {
    /// Adapter name for telemetry tags.
    fn name(&self) -> &str;

    /// The canonical adapter is the user's own data store: it receives
    /// unredacted content and its `TurnCommitted` failures fail the intent.
    fn is_canonical(&self) -> bool {
        false
    }

    /// Whether this adapter handles the intent at all.
    fn supports(&self, intent: &MemoryIntent) -> bool;

    /// Handle one intent.
    async fn handle(&self, intent: &MemoryIntent) -> MemoryResult<AdapterOutcome>;
}

/// Shared adapter handle.
pub type AdapterHandle = Arc<dyn MemoryAdapter>;
