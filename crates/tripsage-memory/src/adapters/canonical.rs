//! Canonical store adapter
//!
//! Owns deduplication and embedding generation. Commit flow: hash, probe for
//! an exact or near-duplicate within the session, merge or insert, then store
//! the embedding. Embedding failure never blocks the commit.

use super::MemoryAdapter;
use crate::error::{MemoryError, MemoryResult};
use crate::intent::{AdapterOutcome, CommitOutcome, MemoryIntent};
use crate::normalize::content_hash;
use crate::store::StoreHandle;
use async_trait::async_trait;
use tracing::{debug, instrument, warn};
use tripsage_core::{EmbeddingsHandle, Turn};
use uuid::Uuid;

/// Cosine similarity at or above which two turns are the same logical turn.
pub const DEDUP_SIMILARITY_THRESHOLD: f32 = 0.95;

/// Canonical adapter over the session store.
pub struct CanonicalStoreAdapter {
    store: StoreHandle,
    /// Absent in degraded mode: turns commit without embeddings
    embeddings: Option<EmbeddingsHandle>,
    /// Recency window for context retrieval
    recency_window: usize,
}

impl CanonicalStoreAdapter {
    pub fn new(store: StoreHandle, embeddings: Option<EmbeddingsHandle>) -> Self {
        Self {
            store,
            embeddings,
            recency_window: 10,
        }
    }

    pub fn with_recency_window(mut self, recency_window: usize) -> Self {
        self.recency_window = recency_window;
        self
    }

    /// Embed turn text; a provider failure degrades to `None`.
    async fn try_embed(&self, text: &str) -> Option<Vec<f32>> {
        let embeddings = self.embeddings.as_ref()?;
        match embeddings.embed_query(text).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                warn!(error = %err, "embedding generation failed; committing without one");
                None
            }
        }
    }

    #[instrument(skip(self, turn), fields(session = %session_id, role = turn.role.as_str()))]
    async fn commit_turn(
        &self,
        session_id: Uuid,
        user_id: &str,
        turn: &Turn,
    ) -> MemoryResult<AdapterOutcome> {
        self.store.ensure_session(user_id, session_id).await?;

        let text = turn.text_content();
        let hash = content_hash(&text);

        // Exact-hash duplicate within the session coalesces (I4 hash arm).
        if let Some(existing) = self
            .store
            .find_turn_by_hash(user_id, session_id, &hash)
            .await?
        {
            debug!(turn = %existing.id, "dedup merge by content hash");
            let merged = self
                .store
                .merge_turn(user_id, session_id, existing.id, &turn.metadata)
                .await?;
            return Ok(AdapterOutcome::Committed(CommitOutcome {
                turn_id: merged.id,
                deduplicated: true,
                embedded: false,
            }));
        }

        // Embedding is also the near-duplicate probe (I4 cosine arm).
        let embedding = if turn.is_tool_only() {
            None
        } else {
            self.try_embed(&text).await
        };

        if let Some(vector) = &embedding {
            let similar = self
                .store
                .similar_turns(user_id, session_id, vector, 3)
                .await?;
            if let Some(near) = similar
                .iter()
                .find(|scored| scored.similarity >= DEDUP_SIMILARITY_THRESHOLD)
            {
                debug!(
                    turn = %near.turn.id,
                    similarity = near.similarity,
                    "dedup merge by cosine similarity"
                );
                let merged = self
                    .store
                    .merge_turn(user_id, session_id, near.turn.id, &turn.metadata)
                    .await?;
                return Ok(AdapterOutcome::Committed(CommitOutcome {
                    turn_id: merged.id,
                    deduplicated: true,
                    embedded: false,
                }));
            }
        }

        let inserted = self.store.insert_turn(user_id, turn, &hash).await?;
        let mut embedded = false;
        if let (Some(vector), Some(embeddings)) = (&embedding, &self.embeddings) {
            match self
                .store
                .store_embedding(user_id, session_id, inserted.id, vector, embeddings.model_id())
                .await
            {
                Ok(()) => embedded = true,
                Err(err) => warn!(error = %err, "embedding store failed; turn remains valid"),
            }
        }

        Ok(AdapterOutcome::Committed(CommitOutcome {
            turn_id: inserted.id,
            deduplicated: false,
            embedded,
        }))
    }

    /// Hybrid retrieval: recency window unioned with vector neighbours beyond
    /// it, deduplicated, truncated to `limit`. Tool turns are excluded.
    async fn fetch_context(
        &self,
        session_id: Uuid,
        user_id: &str,
        limit: usize,
        query: Option<&str>,
    ) -> MemoryResult<AdapterOutcome> {
        if limit == 0 {
            return Ok(AdapterOutcome::Context(Vec::new()));
        }
        let recent_n = self.recency_window.min(limit);
        let mut turns: Vec<Turn> = self
            .store
            .recent_turns(user_id, session_id, recent_n)
            .await?
            .into_iter()
            .filter(|turn| !turn.is_tool_only())
            .collect();

        // Up to limit/2 semantic hits beyond the recency window.
        let semantic_budget = limit / 2;
        if semantic_budget > 0 {
            if let Some(query) = query {
                if let (Some(embeddings), false) = (self.embeddings.as_ref(), query.is_empty()) {
                    match embeddings.embed_query(query).await {
                        Ok(vector) => {
                            let semantic = self
                                .store
                                .similar_turns(user_id, session_id, &vector, semantic_budget * 2)
                                .await?;
                            for scored in semantic {
                                if turns.len() >= limit {
                                    break;
                                }
                                if scored.turn.is_tool_only() {
                                    continue;
                                }
                                if turns.iter().any(|t| t.id == scored.turn.id) {
                                    continue;
                                }
                                turns.push(scored.turn);
                            }
                        }
                        Err(err) => {
                            // Lexical-recency results alone are acceptable.
                            warn!(error = %err, "context query embedding failed");
                        }
                    }
                }
            }
        }

        turns.truncate(limit);
        Ok(AdapterOutcome::Context(turns))
    }

    /// Generate embeddings for turns missing one.
    async fn backfill(&self, session_id: Uuid, user_id: &str) -> MemoryResult<usize> {
        let Some(embeddings) = self.embeddings.as_ref() else {
            return Ok(0);
        };
        let missing = self
            .store
            .turns_missing_embedding(user_id, session_id)
            .await?;
        if missing.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = missing.iter().map(|turn| turn.text_content()).collect();
        let vectors = embeddings
            .embed_documents(&texts)
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        let mut stored = 0;
        for (turn, vector) in missing.iter().zip(vectors.iter()) {
            self.store
                .store_embedding(user_id, session_id, turn.id, vector, embeddings.model_id())
                .await?;
            stored += 1;
        }
        Ok(stored)
    }
}

#[async_trait]
impl MemoryAdapter for CanonicalStoreAdapter {
    fn name(&self) -> &str {
        "canonical"
    }

    fn is_canonical(&self) -> bool {
        true
    }

    fn supports(&self, _intent: &MemoryIntent) -> bool {
        true
    }

    async fn handle(&self, intent: &MemoryIntent) -> MemoryResult<AdapterOutcome> {
        match intent {
            MemoryIntent::TurnCommitted {
                session_id,
                user_id,
                turn,
            } => self.commit_turn(*session_id, user_id, turn).await,
            MemoryIntent::FetchContext {
                session_id,
                user_id,
                limit,
                query,
            } => {
                self.fetch_context(*session_id, user_id, *limit, query.as_deref())
                    .await
            }
            MemoryIntent::SyncSession {
                session_id,
                user_id,
            } => {
                let embedded = self.backfill(*session_id, user_id).await?;
                self.store.touch_session(user_id, *session_id).await?;
                Ok(AdapterOutcome::Synced { embedded })
            }
            MemoryIntent::BackfillSession {
                session_id,
                user_id,
            } => {
                let embedded = self.backfill(*session_id, user_id).await?;
                Ok(AdapterOutcome::Backfilled { embedded })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::sync::Arc;
    use tripsage_testing::MockEmbeddings;
    use tripsage_core::Role;

    fn adapter() -> (CanonicalStoreAdapter, Arc<MockEmbeddings>) {
        let store = Arc::new(InMemoryStore::default());
        let embeddings = Arc::new(MockEmbeddings::default());
        (
            CanonicalStoreAdapter::new(store, Some(embeddings.clone() as _)),
            embeddings,
        )
    }

    #[tokio::test]
    async fn test_commit_inserts_and_embeds() {
        let (adapter, _) = adapter();
        let session = Uuid::new_v4();
        let turn = Turn::text(session, Role::User, "Book Hotel Example");
        let outcome = adapter.commit_turn(session, "u1", &turn).await.unwrap();
        match outcome {
            AdapterOutcome::Committed(commit) => {
                assert!(!commit.deduplicated);
                assert!(commit.embedded);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_identical_commits_coalesce() {
        let (adapter, _) = adapter();
        let session = Uuid::new_v4();
        let first = Turn::text(session, Role::User, "Book Hotel Example");
        let second = Turn::text(session, Role::User, "  book   hotel EXAMPLE ");

        let first_outcome = adapter.commit_turn(session, "u1", &first).await.unwrap();
        let second_outcome = adapter.commit_turn(session, "u1", &second).await.unwrap();

        let (AdapterOutcome::Committed(a), AdapterOutcome::Committed(b)) =
            (first_outcome, second_outcome)
        else {
            panic!("expected commit outcomes");
        };
        assert!(!a.deduplicated);
        assert!(b.deduplicated);
        assert_eq!(a.turn_id, b.turn_id);

        // Exactly one turn survives (P2) and its updated_at moved forward.
        let turns = adapter
            .store
            .recent_turns("u1", session, 10)
            .await
            .unwrap();
        assert_eq!(turns.len(), 1);
        assert!(turns[0].updated_at > turns[0].created_at);
    }

    #[tokio::test]
    async fn test_embedding_failure_still_commits() {
        let (adapter, embeddings) = adapter();
        let session = Uuid::new_v4();
        embeddings.fail_next();
        let turn = Turn::text(session, Role::User, "no embedding today");
        let outcome = adapter.commit_turn(session, "u1", &turn).await.unwrap();
        match outcome {
            AdapterOutcome::Committed(commit) => {
                assert!(!commit.embedded);
                assert!(!commit.deduplicated);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_backfill_embeds_missing() {
        let (adapter, embeddings) = adapter();
        let session = Uuid::new_v4();
        embeddings.fail_next();
        let turn = Turn::text(session, Role::User, "embed me later");
        adapter.commit_turn(session, "u1", &turn).await.unwrap();

        let embedded = adapter.backfill(session, "u1").await.unwrap();
        assert_eq!(embedded, 1);
        assert_eq!(adapter.backfill(session, "u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fetch_context_returns_committed_turn() {
        let (adapter, _) = adapter();
        let session = Uuid::new_v4();
        let turn = Turn::text(session, Role::User, "remember the rooftop bar");
        adapter.commit_turn(session, "u1", &turn).await.unwrap();

        let outcome = adapter
            .fetch_context(session, "u1", 5, Some("rooftop bar"))
            .await
            .unwrap();
        let AdapterOutcome::Context(turns) = outcome else {
            panic!("expected context");
        };
        assert!(turns.iter().any(|t| t.id == turn.id));
    }

    #[tokio::test]
    async fn test_fetch_context_zero_embeddings_is_recency_only() {
        let store = Arc::new(InMemoryStore::default());
        let adapter = CanonicalStoreAdapter::new(store, None);
        let session = Uuid::new_v4();
        let turn = Turn::text(session, Role::User, "lexical only");
        adapter.commit_turn(session, "u1", &turn).await.unwrap();

        let outcome = adapter
            .fetch_context(session, "u1", 4, Some("anything"))
            .await
            .unwrap();
        let AdapterOutcome::Context(turns) = outcome else {
            panic!("expected context");
        };
        assert_eq!(turns.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_turns_excluded_from_context() {
        let (adapter, _) = adapter();
        let session = Uuid::new_v4();
        let tool_turn = Turn::new(
            session,
            Role::Tool,
            vec![tripsage_core::ContentPart::ToolResult {
                id: "c1".into(),
                name: "geo_lookup".into(),
                output: Some(serde_json::json!({})),
                error: None,
            }],
        );
        adapter.commit_turn(session, "u1", &tool_turn).await.unwrap();

        let outcome = adapter.fetch_context(session, "u1", 5, None).await.unwrap();
        let AdapterOutcome::Context(turns) = outcome else {
            panic!("expected context");
        };
        assert!(turns.is_empty());
    }
}
