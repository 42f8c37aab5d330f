//! Conversational memory for TripSage
//!
//! One orchestrator, many adapters. The canonical store (relational +
//! vector) is authoritative; the cache adapter accelerates warm reads.
//! Deduplication, PII redaction, and hybrid context retrieval live here.

pub mod adapters;
pub mod error;
pub mod intent;
pub mod normalize;
pub mod orchestrator;
pub mod redaction;
pub mod store;

pub use adapters::{AdapterHandle, CanonicalStoreAdapter, MemoryAdapter, RedisCacheAdapter};
pub use error::{MemoryError, MemoryResult};
pub use intent::{AdapterOutcome, CommitOutcome, IntentKind, MemoryIntent};
pub use normalize::{content_hash, normalize_content};
pub use orchestrator::MemoryOrchestrator;
pub use redaction::{redact_text, redact_turn, RedactionRecord};
pub use store::{InMemoryStore, IndexParams, PostgresStore, ScoredTurn, SessionStore, StoreHandle};
