//! TripSage agent runtime core
//!
//! The pieces every other crate builds on: the conversation model, the tool
//! catalog with validated execution, the tool-loop engine, the agent router,
//! and the workflow catalog. Transport, persistence, and admission live in
//! sibling crates.

pub mod embeddings;
pub mod engine;
pub mod error;
pub mod language_models;
pub mod messages;
pub mod router;
pub mod tools;
pub mod usage;
pub mod workflows;

pub use embeddings::{cosine_similarity, Embeddings, EmbeddingsHandle, EMBEDDING_DIMENSION};
pub use engine::{AgentEvent, StopPolicy, StopReason, ToolLoopEngine, ToolLoopRequest};
pub use error::{Error, Result};
pub use language_models::{ChatEvent, ChatModel, ChatRequest, ChatStream, ModelHandle, ToolDefinition};
pub use messages::{ChatMessage, ContentPart, Role, ToolCallRequest, ToolResultError, Turn};
pub use router::{AgentRouter, RouterDecision, WorkflowKind};
pub use tools::{CostClass, Tool, ToolContext, ToolOutcome, ToolRegistry};
pub use usage::UsageMetadata;
pub use workflows::{spec_for, workflow_catalog, WorkflowRequest, WorkflowSpec};
