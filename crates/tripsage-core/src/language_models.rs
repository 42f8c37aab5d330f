//! Chat model abstraction
//!
//! The tool-loop engine treats a model as an opaque capability: it submits a
//! [`ChatRequest`] and consumes a stream of [`ChatEvent`]s. Provider identity,
//! transport, and credentials live behind the trait.

use crate::error::Result;
use crate::messages::{ChatMessage, ToolCallRequest};
use crate::usage::UsageMetadata;
use async_trait::async_trait;
use futures::stream::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;

/// Tool made visible to the model for a single request.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A single model invocation.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// System prompt; empty string means none
    pub system: String,
    /// Conversation so far, oldest first
    pub messages: Vec<ChatMessage>,
    /// Tools the model may call this round
    pub tools: Vec<ToolDefinition>,
    /// When set, the model must produce JSON conforming to this schema
    pub response_schema: Option<Value>,
}

/// Streamed model output.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A text fragment; concatenation of deltas is the assistant text
    Delta(String),
    /// A complete tool-call request parsed from the model output
    ToolCall(ToolCallRequest),
    /// Terminal event for the round, with usage for this round only
    Final { text: String, usage: UsageMetadata },
}

/// Stream of model events for one request.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatEvent>> + Send>>;

/// An opaque, user-scoped model capability.
///
/// Implementations must never expose credential material through `Debug`,
/// `Display`, or error messages.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Provider identity (e.g. "openai", "gateway")
    fn provider(&self) -> &str;

    /// Model name used for requests
    fn model(&self) -> &str;

    /// Begin a streaming completion.
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream>;
}

/// Shared handle to a resolved model.
pub type ModelHandle = Arc<dyn ChatModel>;
