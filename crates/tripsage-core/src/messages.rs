//! Conversation message and turn model
//!
//! A [`Turn`] is the persisted unit of conversation: one role, an ordered
//! list of content parts, immutable once committed (dedup merges may touch
//! `updated_at` and metadata, never content).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Message role within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One content part of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    /// Plain text fragment
    Text {
        text: String,
    },
    /// A tool invocation requested by the model
    ToolCall {
        id: String,
        name: String,
        input: Value,
    },
    /// The result of a tool invocation
    ToolResult {
        id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ToolResultError>,
    },
    /// Reference to an attachment in object storage
    AttachmentRef {
        url: String,
        mime_type: String,
    },
}

/// Error payload carried inside a tool-result part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultError {
    pub code: String,
    pub message: String,
}

/// A committed conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: Role,
    pub parts: Vec<ContentPart>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Whether PII scrubbing has been applied to this copy of the content
    pub pii_scrubbed: bool,
    /// Metadata merged on dedup; never part of equality
    #[serde(default)]
    pub metadata: Value,
}

impl Turn {
    /// Build a fresh turn for a session.
    pub fn new(session_id: Uuid, role: Role, parts: Vec<ContentPart>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id,
            role,
            parts,
            created_at: now,
            updated_at: now,
            pii_scrubbed: false,
            metadata: Value::Null,
        }
    }

    /// Convenience constructor for a single-text turn.
    pub fn text(session_id: Uuid, role: Role, text: impl Into<String>) -> Self {
        Self::new(session_id, role, vec![ContentPart::Text { text: text.into() }])
    }

    /// Concatenated text content of the turn (tool parts excluded).
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let ContentPart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }

    /// A turn with no text content, only tool calls/results.
    ///
    /// Tool-only turns are skipped by embedding generation.
    pub fn is_tool_only(&self) -> bool {
        self.role == Role::Tool
            || self.parts.iter().all(|p| {
                matches!(
                    p,
                    ContentPart::ToolCall { .. } | ContentPart::ToolResult { .. }
                )
            })
    }
}

/// A chat message handed to the model (conversation wire form, not persisted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Tool calls requested in an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// For `Role::Tool` messages: the call this result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For `Role::Tool` messages: the tool name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Tool-result message answering `call_id`.
    pub fn tool_result(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
            name: Some(name.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub input: Value,
}
