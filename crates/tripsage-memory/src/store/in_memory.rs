//! In-process session store with an HNSW vector index
//!
//! Used for tests and single-node runs. The index parameters match the
//! canonical pgvector index (`m = 32`, `ef_construction = 180`) so retrieval
//! behavior is comparable across backends.

use super::{ScoredTurn, SessionStore};
use crate::error::{MemoryError, MemoryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hnsw_rs::prelude::*;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use tripsage_core::Turn;
use uuid::Uuid;

/// HNSW construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct IndexParams {
    pub m: usize,
    pub ef_construction: usize,
    pub max_elements: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            m: 32,
            ef_construction: 180,
            max_elements: 10_000,
        }
    }
}

struct StoredTurn {
    turn: Turn,
    content_hash: String,
    has_embedding: bool,
}

struct SessionData {
    user_id: String,
    deleted: bool,
    last_synced_at: Option<DateTime<Utc>>,
    turns: Vec<StoredTurn>,
}

/// In-memory canonical store.
pub struct InMemoryStore {
    sessions: RwLock<HashMap<Uuid, SessionData>>,
    index: Mutex<Hnsw<'static, f32, DistCosine>>,
    /// index data id -> (session, turn)
    index_entries: RwLock<HashMap<usize, (Uuid, Uuid)>>,
    next_index_id: Mutex<usize>,
}

impl InMemoryStore {
    pub fn new(params: IndexParams) -> Self {
        let nb_layer = 16
            .min((params.max_elements as f32).ln().trunc() as usize)
            .max(1);
        let index = Hnsw::<f32, DistCosine>::new(
            params.m,
            params.max_elements,
            nb_layer,
            params.ef_construction,
            DistCosine,
        );
        Self {
            sessions: RwLock::new(HashMap::new()),
            index: Mutex::new(index),
            index_entries: RwLock::new(HashMap::new()),
            next_index_id: Mutex::new(0),
        }
    }

    /// Run `f` over the session after an ownership check.
    fn with_session<T>(
        &self,
        user_id: &str,
        session_id: Uuid,
        f: impl FnOnce(&SessionData) -> T,
    ) -> MemoryResult<T> {
        let sessions = self.sessions.read();
        let session = sessions.get(&session_id).ok_or(MemoryError::NotOwned)?;
        if session.user_id != user_id {
            return Err(MemoryError::NotOwned);
        }
        Ok(f(session))
    }

    fn with_session_mut<T>(
        &self,
        user_id: &str,
        session_id: Uuid,
        f: impl FnOnce(&mut SessionData) -> MemoryResult<T>,
    ) -> MemoryResult<T> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&session_id).ok_or(MemoryError::NotOwned)?;
        if session.user_id != user_id {
            return Err(MemoryError::NotOwned);
        }
        f(session)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(IndexParams::default())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn ensure_session(&self, user_id: &str, session_id: Uuid) -> MemoryResult<()> {
        let mut sessions = self.sessions.write();
        match sessions.get(&session_id) {
            Some(existing) if existing.user_id == user_id => Ok(()),
            Some(_) => Err(MemoryError::NotOwned),
            None => {
                sessions.insert(
                    session_id,
                    SessionData {
                        user_id: user_id.to_string(),
                        deleted: false,
                        last_synced_at: None,
                        turns: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn soft_delete_session(&self, user_id: &str, session_id: Uuid) -> MemoryResult<()> {
        self.with_session_mut(user_id, session_id, |session| {
            session.deleted = true;
            Ok(())
        })
    }

    async fn touch_session(&self, user_id: &str, session_id: Uuid) -> MemoryResult<()> {
        self.with_session_mut(user_id, session_id, |session| {
            session.last_synced_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn find_turn_by_hash(
        &self,
        user_id: &str,
        session_id: Uuid,
        content_hash: &str,
    ) -> MemoryResult<Option<Turn>> {
        self.with_session(user_id, session_id, |session| {
            session
                .turns
                .iter()
                .find(|stored| stored.content_hash == content_hash)
                .map(|stored| stored.turn.clone())
        })
    }

    async fn insert_turn(
        &self,
        user_id: &str,
        turn: &Turn,
        content_hash: &str,
    ) -> MemoryResult<Turn> {
        self.with_session_mut(user_id, turn.session_id, |session| {
            session.turns.push(StoredTurn {
                turn: turn.clone(),
                content_hash: content_hash.to_string(),
                has_embedding: false,
            });
            Ok(turn.clone())
        })
    }

    async fn merge_turn(
        &self,
        user_id: &str,
        session_id: Uuid,
        turn_id: Uuid,
        metadata: &Value,
    ) -> MemoryResult<Turn> {
        self.with_session_mut(user_id, session_id, |session| {
            let stored = session
                .turns
                .iter_mut()
                .find(|stored| stored.turn.id == turn_id)
                .ok_or_else(|| MemoryError::store("merge target missing"))?;
            stored.turn.updated_at = Utc::now();
            if !metadata.is_null() {
                stored.turn.metadata = match (stored.turn.metadata.take(), metadata) {
                    (Value::Object(mut existing), Value::Object(incoming)) => {
                        for (key, value) in incoming {
                            existing.insert(key.clone(), value.clone());
                        }
                        Value::Object(existing)
                    }
                    (_, incoming) => incoming.clone(),
                };
            }
            Ok(stored.turn.clone())
        })
    }

    async fn recent_turns(
        &self,
        user_id: &str,
        session_id: Uuid,
        limit: usize,
    ) -> MemoryResult<Vec<Turn>> {
        self.with_session(user_id, session_id, |session| {
            if session.deleted {
                return Vec::new();
            }
            let start = session.turns.len().saturating_sub(limit);
            session.turns[start..]
                .iter()
                .map(|stored| stored.turn.clone())
                .collect()
        })
    }

    async fn similar_turns(
        &self,
        user_id: &str,
        session_id: Uuid,
        embedding: &[f32],
        k: usize,
    ) -> MemoryResult<Vec<ScoredTurn>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let deleted = self.with_session(user_id, session_id, |session| session.deleted)?;
        if deleted {
            return Ok(Vec::new());
        }

        // The index is global across sessions, so over-fetch and filter down,
        // the same shape the reference HNSW store uses for filtered search.
        let search_k = k * 4;
        let ef_search = (search_k * 2).max(200);
        let neighbours = {
            let index = self.index.lock();
            index.search(embedding, search_k, ef_search)
        };

        let entries = self.index_entries.read();
        let sessions = self.sessions.read();
        let mut results = Vec::new();
        for neighbour in neighbours {
            let Some((owner_session, turn_id)) = entries.get(&neighbour.d_id) else {
                continue;
            };
            if *owner_session != session_id {
                continue;
            }
            let Some(session) = sessions.get(owner_session) else {
                continue;
            };
            if session.user_id != user_id {
                continue;
            }
            if let Some(stored) = session.turns.iter().find(|s| s.turn.id == *turn_id) {
                results.push(ScoredTurn {
                    turn: stored.turn.clone(),
                    similarity: 1.0 - neighbour.distance,
                });
            }
            if results.len() >= k {
                break;
            }
        }
        Ok(results)
    }

    async fn turns_missing_embedding(
        &self,
        user_id: &str,
        session_id: Uuid,
    ) -> MemoryResult<Vec<Turn>> {
        self.with_session(user_id, session_id, |session| {
            session
                .turns
                .iter()
                .filter(|stored| !stored.has_embedding && !stored.turn.is_tool_only())
                .map(|stored| stored.turn.clone())
                .collect()
        })
    }

    async fn store_embedding(
        &self,
        user_id: &str,
        session_id: Uuid,
        turn_id: Uuid,
        embedding: &[f32],
        _model: &str,
    ) -> MemoryResult<()> {
        let already = self.with_session_mut(user_id, session_id, |session| {
            let stored = session
                .turns
                .iter_mut()
                .find(|stored| stored.turn.id == turn_id)
                .ok_or_else(|| MemoryError::store("embedding target missing"))?;
            if stored.has_embedding {
                return Ok(true);
            }
            stored.has_embedding = true;
            Ok(false)
        })?;
        if already {
            return Ok(());
        }

        let data_id = {
            let mut next = self.next_index_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        self.index_entries
            .write()
            .insert(data_id, (session_id, turn_id));
        self.index.lock().insert((embedding, data_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripsage_core::Role;

    fn vec_for(seed: f32) -> Vec<f32> {
        (0..8).map(|i| seed + i as f32 * 0.01).collect()
    }

    #[tokio::test]
    async fn test_ownership_enforced() {
        let store = InMemoryStore::default();
        let session = Uuid::new_v4();
        store.ensure_session("alice", session).await.unwrap();
        let err = store.ensure_session("mallory", session).await.unwrap_err();
        assert!(matches!(err, MemoryError::NotOwned));
        let err = store.recent_turns("mallory", session, 5).await.unwrap_err();
        assert!(matches!(err, MemoryError::NotOwned));
    }

    #[tokio::test]
    async fn test_insert_and_recent_order() {
        let store = InMemoryStore::default();
        let session = Uuid::new_v4();
        store.ensure_session("u", session).await.unwrap();
        for i in 0..5 {
            let turn = Turn::text(session, Role::User, format!("message {i}"));
            store.insert_turn("u", &turn, &format!("h{i}")).await.unwrap();
        }
        let recent = store.recent_turns("u", session, 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].text_content(), "message 2");
        assert_eq!(recent[2].text_content(), "message 4");
    }

    #[tokio::test]
    async fn test_hash_probe_and_merge() {
        let store = InMemoryStore::default();
        let session = Uuid::new_v4();
        store.ensure_session("u", session).await.unwrap();
        let turn = Turn::text(session, Role::User, "Book Hotel Example");
        store.insert_turn("u", &turn, "hash-a").await.unwrap();

        let found = store
            .find_turn_by_hash("u", session, "hash-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, turn.id);

        let merged = store
            .merge_turn("u", session, turn.id, &serde_json::json!({"seen": 2}))
            .await
            .unwrap();
        assert!(merged.updated_at > merged.created_at);
        assert_eq!(merged.metadata["seen"], 2);
        // Content untouched by the merge
        assert_eq!(merged.text_content(), "Book Hotel Example");
    }

    #[tokio::test]
    async fn test_similarity_is_session_scoped() {
        let store = InMemoryStore::default();
        let session_a = Uuid::new_v4();
        let session_b = Uuid::new_v4();
        store.ensure_session("u", session_a).await.unwrap();
        store.ensure_session("u", session_b).await.unwrap();

        let turn_a = Turn::text(session_a, Role::User, "hotels in lisbon");
        let turn_b = Turn::text(session_b, Role::User, "hotels in porto");
        store.insert_turn("u", &turn_a, "ha").await.unwrap();
        store.insert_turn("u", &turn_b, "hb").await.unwrap();
        store
            .store_embedding("u", session_a, turn_a.id, &vec_for(0.1), "m")
            .await
            .unwrap();
        store
            .store_embedding("u", session_b, turn_b.id, &vec_for(0.11), "m")
            .await
            .unwrap();

        let hits = store
            .similar_turns("u", session_a, &vec_for(0.1), 5)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|hit| hit.turn.session_id == session_a));
    }

    #[tokio::test]
    async fn test_embedding_stored_at_most_once() {
        let store = InMemoryStore::default();
        let session = Uuid::new_v4();
        store.ensure_session("u", session).await.unwrap();
        let turn = Turn::text(session, Role::User, "hello");
        store.insert_turn("u", &turn, "h").await.unwrap();

        store
            .store_embedding("u", session, turn.id, &vec_for(0.2), "m")
            .await
            .unwrap();
        store
            .store_embedding("u", session, turn.id, &vec_for(0.9), "m")
            .await
            .unwrap();
        assert!(store
            .turns_missing_embedding("u", session)
            .await
            .unwrap()
            .is_empty());
        // Only one index entry exists for the turn
        assert_eq!(store.index_entries.read().len(), 1);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_turns() {
        let store = InMemoryStore::default();
        let session = Uuid::new_v4();
        store.ensure_session("u", session).await.unwrap();
        let turn = Turn::text(session, Role::User, "to be tombstoned");
        store.insert_turn("u", &turn, "h").await.unwrap();
        store.soft_delete_session("u", session).await.unwrap();
        assert!(store.recent_turns("u", session, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_embeddings_similarity_empty() {
        let store = InMemoryStore::default();
        let session = Uuid::new_v4();
        store.ensure_session("u", session).await.unwrap();
        let hits = store
            .similar_turns("u", session, &vec_for(0.3), 4)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
