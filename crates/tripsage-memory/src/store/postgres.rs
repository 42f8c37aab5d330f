//! Postgres + pgvector canonical store
//!
//! Persists the `memories` namespaces described by the platform schema:
//! `sessions`, `turns` (append-only except dedup merges), and
//! `turn_embeddings` behind an HNSW index. Ownership checks join through
//! `sessions.user_id` on every statement.

use super::{ScoredTurn, SessionStore};
use crate::error::{MemoryError, MemoryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio_postgres::Row;
use tripsage_core::{ContentPart, Role, Turn};
use uuid::Uuid;

/// Canonical store backed by Postgres with the pgvector extension.
pub struct PostgresStore {
    client: Arc<tokio_postgres::Client>,
}

impl PostgresStore {
    pub fn new(client: Arc<tokio_postgres::Client>) -> Self {
        Self { client }
    }

    /// Create the `memories` schema, tables, and the vector index.
    ///
    /// The HNSW parameters are part of the retrieval contract, not tuning:
    /// `m = 32`, `ef_construction = 180`.
    pub async fn init_schema(&self) -> MemoryResult<()> {
        const DDL: &str = r#"
            CREATE SCHEMA IF NOT EXISTS memories;
            CREATE EXTENSION IF NOT EXISTS vector;

            CREATE TABLE IF NOT EXISTS memories.sessions (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT,
                last_synced_at TIMESTAMPTZ,
                deleted_at TIMESTAMPTZ,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb
            );
            CREATE INDEX IF NOT EXISTS sessions_user_idx
                ON memories.sessions (user_id);

            CREATE TABLE IF NOT EXISTS memories.turns (
                id UUID PRIMARY KEY,
                session_id UUID NOT NULL REFERENCES memories.sessions (id),
                role TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                attachments JSONB NOT NULL DEFAULT '[]'::jsonb,
                tool_calls JSONB NOT NULL DEFAULT '[]'::jsonb,
                tool_results JSONB NOT NULL DEFAULT '[]'::jsonb,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                pii_scrubbed BOOLEAN NOT NULL DEFAULT FALSE,
                content_hash TEXT NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb
            );
            CREATE INDEX IF NOT EXISTS turns_session_created_idx
                ON memories.turns (session_id, created_at);
            CREATE UNIQUE INDEX IF NOT EXISTS turns_session_hash_idx
                ON memories.turns (session_id, content_hash);

            CREATE TABLE IF NOT EXISTS memories.turn_embeddings (
                turn_id UUID PRIMARY KEY REFERENCES memories.turns (id),
                embedding vector(1536) NOT NULL,
                model TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS turn_embeddings_hnsw_idx
                ON memories.turn_embeddings
                USING hnsw (embedding vector_cosine_ops)
                WITH (m = 32, ef_construction = 180);
        "#;
        self.client
            .batch_execute(DDL)
            .await
            .map_err(|e| MemoryError::store(format!("schema init failed: {e}")))
    }

    fn map_err(err: tokio_postgres::Error) -> MemoryError {
        MemoryError::store(err.to_string())
    }

    /// Ownership guard: the session must exist and belong to `user_id`.
    async fn assert_owned(&self, user_id: &str, session_id: Uuid) -> MemoryResult<()> {
        let row = self
            .client
            .query_opt(
                "SELECT user_id FROM memories.sessions WHERE id = $1",
                &[&session_id],
            )
            .await
            .map_err(Self::map_err)?;
        match row {
            Some(row) if row.get::<_, String>(0) == user_id => Ok(()),
            _ => Err(MemoryError::NotOwned),
        }
    }
}

/// pgvector literal form: `[0.1,0.2,...]`, cast server-side.
fn vector_literal(embedding: &[f32]) -> String {
    let mut out = String::with_capacity(embedding.len() * 10 + 2);
    out.push('[');
    for (i, value) in embedding.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&value.to_string());
    }
    out.push(']');
    out
}

/// Decompose turn parts into the column layout.
fn parts_to_columns(turn: &Turn) -> (String, Value, Value, Value) {
    let mut text = String::new();
    let mut attachments = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();
    for part in &turn.parts {
        match part {
            ContentPart::Text { text: fragment } => text.push_str(fragment),
            ContentPart::AttachmentRef { url, mime_type } => {
                attachments.push(serde_json::json!({"url": url, "mime_type": mime_type}));
            }
            ContentPart::ToolCall { id, name, input } => {
                tool_calls.push(serde_json::json!({"id": id, "name": name, "input": input}));
            }
            ContentPart::ToolResult {
                id,
                name,
                output,
                error,
            } => {
                tool_results.push(serde_json::json!({
                    "id": id, "name": name, "output": output, "error": error,
                }));
            }
        }
    }
    (
        text,
        Value::Array(attachments),
        Value::Array(tool_calls),
        Value::Array(tool_results),
    )
}

fn columns_to_parts(
    content: &str,
    attachments: &Value,
    tool_calls: &Value,
    tool_results: &Value,
) -> Vec<ContentPart> {
    let mut parts = Vec::new();
    if !content.is_empty() {
        parts.push(ContentPart::Text {
            text: content.to_string(),
        });
    }
    if let Some(items) = tool_calls.as_array() {
        for item in items {
            parts.push(ContentPart::ToolCall {
                id: item["id"].as_str().unwrap_or_default().to_string(),
                name: item["name"].as_str().unwrap_or_default().to_string(),
                input: item["input"].clone(),
            });
        }
    }
    if let Some(items) = tool_results.as_array() {
        for item in items {
            parts.push(ContentPart::ToolResult {
                id: item["id"].as_str().unwrap_or_default().to_string(),
                name: item["name"].as_str().unwrap_or_default().to_string(),
                output: (!item["output"].is_null()).then(|| item["output"].clone()),
                error: serde_json::from_value(item["error"].clone()).ok(),
            });
        }
    }
    if let Some(items) = attachments.as_array() {
        for item in items {
            parts.push(ContentPart::AttachmentRef {
                url: item["url"].as_str().unwrap_or_default().to_string(),
                mime_type: item["mime_type"].as_str().unwrap_or_default().to_string(),
            });
        }
    }
    parts
}

const TURN_COLUMNS: &str =
    "t.id, t.session_id, t.role, t.content, t.attachments, t.tool_calls, t.tool_results, \
     t.created_at, t.updated_at, t.pii_scrubbed, t.metadata";

fn row_to_turn(row: &Row) -> MemoryResult<Turn> {
    let role = match row.get::<_, String>(2).as_str() {
        "system" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        other => return Err(MemoryError::store(format!("unknown role '{other}'"))),
    };
    let content: String = row.get(3);
    let attachments: Value = row.get(4);
    let tool_calls: Value = row.get(5);
    let tool_results: Value = row.get(6);
    Ok(Turn {
        id: row.get(0),
        session_id: row.get(1),
        role,
        parts: columns_to_parts(&content, &attachments, &tool_calls, &tool_results),
        created_at: row.get::<_, DateTime<Utc>>(7),
        updated_at: row.get::<_, DateTime<Utc>>(8),
        pii_scrubbed: row.get(9),
        metadata: row.get(10),
    })
}

#[async_trait]
impl SessionStore for PostgresStore {
    async fn ensure_session(&self, user_id: &str, session_id: Uuid) -> MemoryResult<()> {
        self.client
            .execute(
                "INSERT INTO memories.sessions (id, user_id) VALUES ($1, $2)
                 ON CONFLICT (id) DO NOTHING",
                &[&session_id, &user_id],
            )
            .await
            .map_err(Self::map_err)?;
        self.assert_owned(user_id, session_id).await
    }

    async fn soft_delete_session(&self, user_id: &str, session_id: Uuid) -> MemoryResult<()> {
        let updated = self
            .client
            .execute(
                "UPDATE memories.sessions SET deleted_at = now()
                 WHERE id = $1 AND user_id = $2",
                &[&session_id, &user_id],
            )
            .await
            .map_err(Self::map_err)?;
        if updated == 0 {
            return Err(MemoryError::NotOwned);
        }
        Ok(())
    }

    async fn touch_session(&self, user_id: &str, session_id: Uuid) -> MemoryResult<()> {
        let updated = self
            .client
            .execute(
                "UPDATE memories.sessions SET last_synced_at = now()
                 WHERE id = $1 AND user_id = $2",
                &[&session_id, &user_id],
            )
            .await
            .map_err(Self::map_err)?;
        if updated == 0 {
            return Err(MemoryError::NotOwned);
        }
        Ok(())
    }

    async fn find_turn_by_hash(
        &self,
        user_id: &str,
        session_id: Uuid,
        content_hash: &str,
    ) -> MemoryResult<Option<Turn>> {
        let query = format!(
            "SELECT {TURN_COLUMNS} FROM memories.turns t
             JOIN memories.sessions s ON s.id = t.session_id
             WHERE t.session_id = $1 AND s.user_id = $2 AND t.content_hash = $3"
        );
        let row = self
            .client
            .query_opt(&query, &[&session_id, &user_id, &content_hash])
            .await
            .map_err(Self::map_err)?;
        row.map(|row| row_to_turn(&row)).transpose()
    }

    async fn insert_turn(
        &self,
        user_id: &str,
        turn: &Turn,
        content_hash: &str,
    ) -> MemoryResult<Turn> {
        self.assert_owned(user_id, turn.session_id).await?;
        let (content, attachments, tool_calls, tool_results) = parts_to_columns(turn);
        let metadata = if turn.metadata.is_null() {
            serde_json::json!({})
        } else {
            turn.metadata.clone()
        };
        self.client
            .execute(
                "INSERT INTO memories.turns
                    (id, session_id, role, content, attachments, tool_calls, tool_results,
                     created_at, updated_at, pii_scrubbed, content_hash, metadata)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
                &[
                    &turn.id,
                    &turn.session_id,
                    &turn.role.as_str(),
                    &content,
                    &attachments,
                    &tool_calls,
                    &tool_results,
                    &turn.created_at,
                    &turn.updated_at,
                    &turn.pii_scrubbed,
                    &content_hash,
                    &metadata,
                ],
            )
            .await
            .map_err(Self::map_err)?;
        Ok(turn.clone())
    }

    async fn merge_turn(
        &self,
        user_id: &str,
        session_id: Uuid,
        turn_id: Uuid,
        metadata: &Value,
    ) -> MemoryResult<Turn> {
        let query = format!(
            "UPDATE memories.turns t
             SET updated_at = now(),
                 metadata = t.metadata || $4::jsonb
             FROM memories.sessions s
             WHERE t.id = $1 AND t.session_id = $2 AND s.id = t.session_id AND s.user_id = $3
             RETURNING {TURN_COLUMNS}"
        );
        let merge_metadata = if metadata.is_null() {
            serde_json::json!({})
        } else {
            metadata.clone()
        };
        let row = self
            .client
            .query_opt(&query, &[&turn_id, &session_id, &user_id, &merge_metadata])
            .await
            .map_err(Self::map_err)?
            .ok_or(MemoryError::NotOwned)?;
        row_to_turn(&row)
    }

    async fn recent_turns(
        &self,
        user_id: &str,
        session_id: Uuid,
        limit: usize,
    ) -> MemoryResult<Vec<Turn>> {
        let query = format!(
            "SELECT {TURN_COLUMNS} FROM memories.turns t
             JOIN memories.sessions s ON s.id = t.session_id
             WHERE t.session_id = $1 AND s.user_id = $2 AND s.deleted_at IS NULL
             ORDER BY t.created_at DESC
             LIMIT $3"
        );
        let rows = self
            .client
            .query(&query, &[&session_id, &user_id, &(limit as i64)])
            .await
            .map_err(Self::map_err)?;
        let mut turns: Vec<Turn> = rows
            .iter()
            .map(row_to_turn)
            .collect::<MemoryResult<Vec<_>>>()?;
        turns.reverse();
        Ok(turns)
    }

    async fn similar_turns(
        &self,
        user_id: &str,
        session_id: Uuid,
        embedding: &[f32],
        k: usize,
    ) -> MemoryResult<Vec<ScoredTurn>> {
        let query = format!(
            "SELECT {TURN_COLUMNS}, 1 - (e.embedding <=> $3::vector) AS similarity
             FROM memories.turn_embeddings e
             JOIN memories.turns t ON t.id = e.turn_id
             JOIN memories.sessions s ON s.id = t.session_id
             WHERE t.session_id = $1 AND s.user_id = $2 AND s.deleted_at IS NULL
             ORDER BY e.embedding <=> $3::vector
             LIMIT $4"
        );
        let literal = vector_literal(embedding);
        let rows = self
            .client
            .query(&query, &[&session_id, &user_id, &literal, &(k as i64)])
            .await
            .map_err(Self::map_err)?;
        rows.iter()
            .map(|row| {
                Ok(ScoredTurn {
                    turn: row_to_turn(row)?,
                    similarity: row.get::<_, f64>(11) as f32,
                })
            })
            .collect()
    }

    async fn turns_missing_embedding(
        &self,
        user_id: &str,
        session_id: Uuid,
    ) -> MemoryResult<Vec<Turn>> {
        let query = format!(
            "SELECT {TURN_COLUMNS} FROM memories.turns t
             JOIN memories.sessions s ON s.id = t.session_id
             LEFT JOIN memories.turn_embeddings e ON e.turn_id = t.id
             WHERE t.session_id = $1 AND s.user_id = $2
               AND e.turn_id IS NULL AND t.role <> 'tool'
             ORDER BY t.created_at"
        );
        let rows = self
            .client
            .query(&query, &[&session_id, &user_id])
            .await
            .map_err(Self::map_err)?;
        rows.iter().map(row_to_turn).collect()
    }

    async fn store_embedding(
        &self,
        user_id: &str,
        session_id: Uuid,
        turn_id: Uuid,
        embedding: &[f32],
        model: &str,
    ) -> MemoryResult<()> {
        self.assert_owned(user_id, session_id).await?;
        let literal = vector_literal(embedding);
        // ON CONFLICT DO NOTHING: at most one embedding per turn.
        self.client
            .execute(
                "INSERT INTO memories.turn_embeddings (turn_id, embedding, model)
                 VALUES ($1, $2::vector, $3)
                 ON CONFLICT (turn_id) DO NOTHING",
                &[&turn_id, &literal, &model],
            )
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripsage_core::ToolResultError;

    #[test]
    fn test_vector_literal_shape() {
        assert_eq!(vector_literal(&[0.5, -1.0, 2.0]), "[0.5,-1,2]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn test_parts_round_trip_through_columns() {
        let session = Uuid::new_v4();
        let turn = Turn::new(
            session,
            Role::Assistant,
            vec![
                ContentPart::Text {
                    text: "Here are flights".into(),
                },
                ContentPart::ToolCall {
                    id: "c1".into(),
                    name: "flight_search".into(),
                    input: serde_json::json!({"origin": "JFK"}),
                },
                ContentPart::ToolResult {
                    id: "c1".into(),
                    name: "flight_search".into(),
                    output: None,
                    error: Some(ToolResultError {
                        code: "TOOL_TIMEOUT".into(),
                        message: "slow".into(),
                    }),
                },
                ContentPart::AttachmentRef {
                    url: "s3://bucket/itinerary.pdf".into(),
                    mime_type: "application/pdf".into(),
                },
            ],
        );
        let (content, attachments, tool_calls, tool_results) = parts_to_columns(&turn);
        let parts = columns_to_parts(&content, &attachments, &tool_calls, &tool_results);

        assert!(parts.contains(&ContentPart::Text {
            text: "Here are flights".into()
        }));
        assert!(parts.iter().any(|p| matches!(
            p,
            ContentPart::ToolCall { name, .. } if name == "flight_search"
        )));
        assert!(parts.iter().any(|p| matches!(
            p,
            ContentPart::ToolResult { error: Some(err), .. } if err.code == "TOOL_TIMEOUT"
        )));
        assert!(parts.iter().any(|p| matches!(
            p,
            ContentPart::AttachmentRef { mime_type, .. } if mime_type == "application/pdf"
        )));
    }
}
