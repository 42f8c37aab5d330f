//! Memory orchestrator
//!
//! Single entry point for memory intents. Adapters run sequentially in
//! registration order (canonical first). Failure isolation: a non-canonical
//! adapter failure is logged and tagged but never aborts the intent; a
//! canonical failure on `TurnCommitted` fails the intent to the caller.

use crate::adapters::AdapterHandle;
use crate::error::{MemoryError, MemoryResult};
use crate::intent::{AdapterOutcome, CommitOutcome, MemoryIntent};
use crate::redaction::redact_turn;
use tracing::{instrument, warn};
use tripsage_core::Turn;
use uuid::Uuid;

/// Intent dispatcher over registered adapters.
pub struct MemoryOrchestrator {
    adapters: Vec<AdapterHandle>,
}

impl MemoryOrchestrator {
    /// Compose the orchestrator. Registration order is dispatch order; the
    /// canonical adapter belongs first.
    pub fn new(adapters: Vec<AdapterHandle>) -> Self {
        Self { adapters }
    }

    /// A redacted copy of the intent for non-canonical adapters.
    fn redacted(intent: &MemoryIntent) -> MemoryIntent {
        match intent {
            MemoryIntent::TurnCommitted {
                session_id,
                user_id,
                turn,
            } => MemoryIntent::TurnCommitted {
                session_id: *session_id,
                user_id: user_id.clone(),
                turn: redact_turn(turn),
            },
            other => other.clone(),
        }
    }

    /// Dispatch one intent through all supporting adapters.
    #[instrument(skip(self, intent), fields(intent = intent.kind().as_str(), session = %intent.session_id()))]
    pub async fn dispatch(&self, intent: MemoryIntent) -> MemoryResult<Vec<AdapterOutcome>> {
        let is_commit = matches!(intent, MemoryIntent::TurnCommitted { .. });
        let redacted = Self::redacted(&intent);
        let mut outcomes = Vec::new();

        for adapter in &self.adapters {
            let view = if adapter.is_canonical() {
                &intent
            } else {
                &redacted
            };
            if !adapter.supports(view) {
                continue;
            }
            match adapter.handle(view).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) if adapter.is_canonical() && is_commit => {
                    // The caller may retry; nothing else runs for this intent.
                    warn!(adapter = adapter.name(), error = %err, "canonical commit failed");
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        adapter = adapter.name(),
                        intent = intent.kind().as_str(),
                        error = %err,
                        "memory adapter failed; continuing"
                    );
                }
            }
        }
        Ok(outcomes)
    }

    /// Commit a turn; returns the canonical commit outcome.
    pub async fn commit_turn(
        &self,
        session_id: Uuid,
        user_id: &str,
        turn: Turn,
    ) -> MemoryResult<CommitOutcome> {
        let outcomes = self
            .dispatch(MemoryIntent::TurnCommitted {
                session_id,
                user_id: user_id.to_string(),
                turn,
            })
            .await?;
        outcomes
            .into_iter()
            .find_map(|outcome| match outcome {
                AdapterOutcome::Committed(commit) => Some(commit),
                _ => None,
            })
            .ok_or_else(|| MemoryError::store("no canonical adapter produced a commit"))
    }

    /// Fetch the most relevant prior turns for a new prompt.
    pub async fn fetch_context(
        &self,
        session_id: Uuid,
        user_id: &str,
        limit: usize,
        query: Option<String>,
    ) -> MemoryResult<Vec<Turn>> {
        let outcomes = self
            .dispatch(MemoryIntent::FetchContext {
                session_id,
                user_id: user_id.to_string(),
                limit,
                query,
            })
            .await?;
        Ok(outcomes
            .into_iter()
            .find_map(|outcome| match outcome {
                AdapterOutcome::Context(turns) => Some(turns),
                _ => None,
            })
            .unwrap_or_default())
    }

    /// Bring derived state into agreement with the canonical store.
    pub async fn sync_session(&self, session_id: Uuid, user_id: &str) -> MemoryResult<()> {
        self.dispatch(MemoryIntent::SyncSession {
            session_id,
            user_id: user_id.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Generate embeddings for historical turns missing one.
    pub async fn backfill_session(&self, session_id: Uuid, user_id: &str) -> MemoryResult<usize> {
        let outcomes = self
            .dispatch(MemoryIntent::BackfillSession {
                session_id,
                user_id: user_id.to_string(),
            })
            .await?;
        Ok(outcomes
            .into_iter()
            .find_map(|outcome| match outcome {
                AdapterOutcome::Backfilled { embedded } => Some(embedded),
                _ => None,
            })
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{CanonicalStoreAdapter, MemoryAdapter};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tripsage_core::Role;
    use tripsage_testing::MockEmbeddings;

    /// Secondary adapter that records what it saw and can be told to fail.
    struct RecordingAdapter {
        calls: AtomicUsize,
        seen_texts: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingAdapter {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                seen_texts: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl MemoryAdapter for RecordingAdapter {
        fn name(&self) -> &str {
            "recording"
        }

        fn supports(&self, intent: &MemoryIntent) -> bool {
            matches!(intent, MemoryIntent::TurnCommitted { .. })
        }

        async fn handle(&self, intent: &MemoryIntent) -> MemoryResult<AdapterOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let MemoryIntent::TurnCommitted { turn, .. } = intent {
                self.seen_texts
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(turn.text_content());
            }
            if self.fail {
                return Err(MemoryError::adapter("recording", "forced failure"));
            }
            Ok(AdapterOutcome::Done)
        }
    }

    fn orchestrator_with(secondary: Arc<RecordingAdapter>) -> MemoryOrchestrator {
        let store = Arc::new(InMemoryStore::default());
        let embeddings = Arc::new(MockEmbeddings::default());
        let canonical = Arc::new(CanonicalStoreAdapter::new(store, Some(embeddings as _)));
        MemoryOrchestrator::new(vec![canonical, secondary])
    }

    #[tokio::test]
    async fn test_commit_flows_through_both_adapters() {
        let recording = Arc::new(RecordingAdapter::new(false));
        let orchestrator = orchestrator_with(Arc::clone(&recording));
        let session = Uuid::new_v4();
        let turn = Turn::text(session, Role::User, "plain message");

        let commit = orchestrator.commit_turn(session, "u1", turn).await.unwrap();
        assert!(!commit.deduplicated);
        assert_eq!(recording.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_canonical_adapter_sees_redacted_content() {
        let recording = Arc::new(RecordingAdapter::new(false));
        let orchestrator = orchestrator_with(Arc::clone(&recording));
        let session = Uuid::new_v4();
        let turn = Turn::text(session, Role::User, "mail me at ana@example.com");

        orchestrator.commit_turn(session, "u1", turn).await.unwrap();

        let seen = recording.seen_texts.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].contains("ana@example.com"));
        assert!(seen[0].contains("[email:"));

        // The canonical store kept the original.
        let context = orchestrator
            .fetch_context(session, "u1", 5, None)
            .await
            .unwrap();
        assert!(context[0].text_content().contains("ana@example.com"));
    }

    #[tokio::test]
    async fn test_secondary_failure_does_not_fail_intent() {
        let recording = Arc::new(RecordingAdapter::new(true));
        let orchestrator = orchestrator_with(Arc::clone(&recording));
        let session = Uuid::new_v4();
        let turn = Turn::text(session, Role::User, "still committed");

        let commit = orchestrator.commit_turn(session, "u1", turn).await.unwrap();
        assert!(!commit.deduplicated);
        assert_eq!(recording.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_canonical_failure_on_commit_propagates() {
        struct FailingCanonical;

        #[async_trait]
        impl MemoryAdapter for FailingCanonical {
            fn name(&self) -> &str {
                "canonical"
            }
            fn is_canonical(&self) -> bool {
                true
            }
            fn supports(&self, _intent: &MemoryIntent) -> bool {
                true
            }
            async fn handle(&self, _intent: &MemoryIntent) -> MemoryResult<AdapterOutcome> {
                Err(MemoryError::store("write refused"))
            }
        }

        let recording = Arc::new(RecordingAdapter::new(false));
        let orchestrator =
            MemoryOrchestrator::new(vec![Arc::new(FailingCanonical), recording.clone()]);
        let session = Uuid::new_v4();
        let turn = Turn::text(session, Role::User, "doomed");

        let err = orchestrator
            .commit_turn(session, "u1", turn)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Store(_)));
        // Later adapters never ran.
        assert_eq!(recording.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dedup_converges_across_commits() {
        let recording = Arc::new(RecordingAdapter::new(false));
        let orchestrator = orchestrator_with(recording);
        let session = Uuid::new_v4();

        let a = orchestrator
            .commit_turn(session, "u1", Turn::text(session, Role::User, "Book Hotel Example"))
            .await
            .unwrap();
        let b = orchestrator
            .commit_turn(session, "u1", Turn::text(session, Role::User, "book hotel example"))
            .await
            .unwrap();
        assert_eq!(a.turn_id, b.turn_id);
        assert!(b.deduplicated);

        let context = orchestrator
            .fetch_context(session, "u1", 10, None)
            .await
            .unwrap();
        assert_eq!(context.len(), 1);
    }

    #[tokio::test]
    async fn test_backfill_counts() {
        let store = Arc::new(InMemoryStore::default());
        let embeddings = Arc::new(MockEmbeddings::default());
        let canonical = Arc::new(CanonicalStoreAdapter::new(
            Arc::clone(&store) as _,
            Some(Arc::clone(&embeddings) as _),
        ));
        let orchestrator = MemoryOrchestrator::new(vec![canonical]);
        let session = Uuid::new_v4();

        embeddings.fail_next();
        orchestrator
            .commit_turn(session, "u1", Turn::text(session, Role::User, "later"))
            .await
            .unwrap();
        assert_eq!(
            orchestrator.backfill_session(session, "u1").await.unwrap(),
            1
        );
    }
}
