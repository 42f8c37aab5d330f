//! Tool-loop engine
//!
//! Drives the bounded iteration between a model and a set of tools:
//! `AwaitModel -> AwaitTool -> AwaitModel -> ... -> Final`. Events are
//! produced into a bounded single-producer channel; the subscriber (the
//! chat stream handler) renders them onto the wire.
//!
//! Client disconnects are observed as a closed channel: the engine abandons
//! at the next model boundary, while an in-flight tool call runs to
//! completion and its result is discarded.

use crate::error::{Error, Result};
use crate::language_models::{ChatEvent, ChatRequest, ModelHandle};
use crate::messages::{ChatMessage, Role, ToolCallRequest, ToolResultError};
use crate::tools::{CostClass, ToolContext, ToolFailure, ToolOutcome, ToolRegistry};
use crate::usage::UsageMetadata;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-workflow loop termination policy.
#[derive(Debug, Clone, Copy)]
pub struct StopPolicy {
    /// Maximum number of tool calls across the invocation
    pub max_tool_calls: u32,
    /// Wall-clock deadline from loop start
    pub deadline: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            max_tool_calls: 8,
            deadline: Duration::from_secs(120),
        }
    }
}

/// Why the loop terminated.
///
/// When multiple conditions hold simultaneously, a stop-worthy tool error
/// wins, then the ceiling, then the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    FinalMessage,
    FatalToolError,
    ToolCallCeiling,
    DeadlineExceeded,
    Abandoned,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::FinalMessage => "final_message",
            StopReason::FatalToolError => "fatal_tool_error",
            StopReason::ToolCallCeiling => "tool_call_ceiling",
            StopReason::DeadlineExceeded => "deadline_exceeded",
            StopReason::Abandoned => "abandoned",
        }
    }
}

/// Event emitted by the engine, in wire order.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Exactly once, at the head of the stream
    Started { user: String },
    /// Zero or more text fragments; concatenation is the assistant text
    Delta { content: String },
    /// A tool invocation is about to run
    ToolCall { name: String, input: Value },
    /// Paired with each tool-call
    ToolResult {
        name: String,
        output: Option<Value>,
        error: Option<ToolResultError>,
        /// Dense, strictly increasing from 0 within the invocation
        sequence_index: u32,
    },
    /// Exactly once on success, with accumulated usage
    Final {
        content: String,
        usage: UsageMetadata,
    },
    /// Terminates the stream; always the last non-sentinel event
    Error { code: String, message: String },
}

/// One tool-loop invocation.
#[derive(Debug, Clone)]
pub struct ToolLoopRequest {
    pub user_id: String,
    pub session_id: Option<Uuid>,
    pub system_prompt: String,
    /// Conversation so far, oldest first, ending with the latest user message
    pub messages: Vec<ChatMessage>,
    /// Whitelisted tool names resolved against the registry
    pub tool_names: Vec<String>,
    pub stop_policy: StopPolicy,
}

/// The tool-loop engine. Cheap to clone; holds only shared registries.
#[derive(Clone)]
pub struct ToolLoopEngine {
    registry: Arc<ToolRegistry>,
    channel_capacity: usize,
}

impl ToolLoopEngine {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            channel_capacity: 64,
        }
    }

    /// Run one invocation, returning the event stream.
    ///
    /// The loop runs on a spawned task; dropping the returned stream abandons
    /// the loop at the next model boundary.
    pub fn run(&self, model: ModelHandle, request: ToolLoopRequest) -> ReceiverStream<AgentEvent> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let reason = drive_loop(&registry, model, request, &tx).await;
            debug!(stop_reason = reason.as_str(), "tool loop finished");
        });
        ReceiverStream::new(rx)
    }
}

/// Emit helper: returns false once the subscriber is gone.
async fn emit(tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) -> bool {
    tx.send(event).await.is_ok()
}

async fn drive_loop(
    registry: &ToolRegistry,
    model: ModelHandle,
    request: ToolLoopRequest,
    tx: &mpsc::Sender<AgentEvent>,
) -> StopReason {
    let started_at = Instant::now();
    let context = ToolContext {
        user_id: request.user_id.clone(),
        session_id: request.session_id,
    };
    let tools = registry.definitions_for(&request.tool_names);
    let mut conversation = request.messages;
    let mut usage = UsageMetadata::default();
    let mut assistant_text = String::new();
    let mut sequence_index: u32 = 0;
    let mut per_tool_calls: HashMap<String, u32> = HashMap::new();

    if !emit(
        tx,
        AgentEvent::Started {
            user: request.user_id.clone(),
        },
    )
    .await
    {
        return StopReason::Abandoned;
    }

    loop {
        // AwaitModel
        let chat_request = ChatRequest {
            system: request.system_prompt.clone(),
            messages: conversation.clone(),
            tools: tools.clone(),
            response_schema: None,
        };
        let mut stream = match model.stream_chat(chat_request).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "model request failed");
                emit(
                    tx,
                    AgentEvent::Error {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    },
                )
                .await;
                return StopReason::FinalMessage;
            }
        };

        let mut round_text = String::new();
        let mut pending_calls: Vec<ToolCallRequest> = Vec::new();
        let mut round_final_text: Option<String> = None;

        while let Some(event) = stream.next().await {
            match event {
                Ok(ChatEvent::Delta(fragment)) => {
                    round_text.push_str(&fragment);
                    if !emit(tx, AgentEvent::Delta { content: fragment }).await {
                        return StopReason::Abandoned;
                    }
                }
                Ok(ChatEvent::ToolCall(call)) => pending_calls.push(call),
                Ok(ChatEvent::Final { text, usage: u }) => {
                    usage.add(u);
                    round_final_text = Some(text);
                }
                Err(err) => {
                    emit(
                        tx,
                        AgentEvent::Error {
                            code: err.code().to_string(),
                            message: err.to_string(),
                        },
                    )
                    .await;
                    return StopReason::FinalMessage;
                }
            }
        }

        // A non-streaming provider may deliver text only in the final event.
        if round_text.is_empty() {
            if let Some(text) = round_final_text.filter(|t| !t.is_empty()) {
                round_text = text;
                if !emit(
                    tx,
                    AgentEvent::Delta {
                        content: round_text.clone(),
                    },
                )
                .await
                {
                    return StopReason::Abandoned;
                }
            }
        }
        assistant_text.push_str(&round_text);

        if pending_calls.is_empty() {
            // Terminal message with no further tool calls: condition (a).
            emit(
                tx,
                AgentEvent::Final {
                    content: assistant_text,
                    usage,
                },
            )
            .await;
            return StopReason::FinalMessage;
        }

        conversation.push(ChatMessage {
            role: Role::Assistant,
            content: round_text,
            tool_calls: pending_calls.clone(),
            tool_call_id: None,
            name: None,
        });

        // AwaitTool: execute calls in request order, then re-enter AwaitModel.
        let mut fatal: Option<ToolResultError> = None;
        for call in pending_calls {
            if !emit(
                tx,
                AgentEvent::ToolCall {
                    name: call.name.clone(),
                    input: call.input.clone(),
                },
            )
            .await
            {
                return StopReason::Abandoned;
            }

            // Whitelist check: the model only saw this workflow's tools, but
            // a hallucinated name must not reach the wider registry.
            let outcome = if request.tool_names.iter().any(|name| name == &call.name) {
                registry.execute(&call.name, call.input, &context).await
            } else {
                ToolOutcome {
                    tool: call.name.clone(),
                    result: Err(ToolFailure {
                        code: "TOOL_VALIDATION",
                        message: format!("tool '{}' is not available in this workflow", call.name),
                        stop_worthy: false,
                    }),
                    duration: Duration::ZERO,
                    cost_class: CostClass::Standard,
                }
            };
            *per_tool_calls.entry(call.name.clone()).or_insert(0) += 1;

            let (output, error, tool_content) = match &outcome.result {
                Ok(value) => (Some(value.clone()), None, value.to_string()),
                Err(failure) => {
                    let err = ToolResultError {
                        code: failure.code.to_string(),
                        message: failure.message.clone(),
                    };
                    if failure.stop_worthy && fatal.is_none() {
                        fatal = Some(err.clone());
                    }
                    let content = serde_json::json!({
                        "error": {"code": err.code, "message": err.message}
                    })
                    .to_string();
                    (None, Some(err), content)
                }
            };

            if !emit(
                tx,
                AgentEvent::ToolResult {
                    name: outcome.tool.clone(),
                    output,
                    error,
                    sequence_index,
                },
            )
            .await
            {
                return StopReason::Abandoned;
            }
            sequence_index += 1;

            conversation.push(ChatMessage::tool_result(
                call.id.clone(),
                call.name.clone(),
                tool_content,
            ));

            // Stop policy, evaluated after each AwaitTool step. Tie-break:
            // a stop-worthy tool error over ceiling over deadline.
            let ceiling_hit = sequence_index >= request.stop_policy.max_tool_calls;
            let deadline_hit = started_at.elapsed() >= request.stop_policy.deadline;
            if let Some(err) = fatal.take() {
                info!(tool = %outcome.tool, "stop-worthy tool error terminated loop");
                emit(
                    tx,
                    AgentEvent::Error {
                        code: err.code,
                        message: err.message,
                    },
                )
                .await;
                return StopReason::FatalToolError;
            }
            if ceiling_hit {
                emit(
                    tx,
                    AgentEvent::Error {
                        code: "STOP_POLICY_EXHAUSTED".to_string(),
                        message: format!(
                            "tool-call ceiling of {} reached before a final message",
                            request.stop_policy.max_tool_calls
                        ),
                    },
                )
                .await;
                return StopReason::ToolCallCeiling;
            }
            if deadline_hit {
                emit(
                    tx,
                    AgentEvent::Error {
                        code: "STOP_POLICY_EXHAUSTED".to_string(),
                        message: format!(
                            "deadline of {:?} reached before a final message",
                            request.stop_policy.deadline
                        ),
                    },
                )
                .await;
                return StopReason::DeadlineExceeded;
            }
        }
    }
}

/// Collect an engine stream into the assembled assistant reply.
///
/// Returns the final content and usage, or the first error event as an
/// [`Error`]. For callers that want the full reply rather than the stream.
pub async fn collect_final(mut stream: ReceiverStream<AgentEvent>) -> Result<(String, UsageMetadata)> {
    let mut last: Option<(String, UsageMetadata)> = None;
    while let Some(event) = stream.next().await {
        match event {
            AgentEvent::Final { content, usage } => last = Some((content, usage)),
            AgentEvent::Error { code, message } => {
                return Err(match code.as_str() {
                    "STOP_POLICY_EXHAUSTED" => Error::StopPolicyExhausted(message),
                    "PROVIDER_UNAVAILABLE" => Error::ProviderUnavailable(message),
                    _ => Error::internal(format!("{code}: {message}")),
                });
            }
            _ => {}
        }
    }
    last.ok_or_else(|| Error::internal("stream ended without a final event"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language_models::{ChatModel, ChatStream};
    use crate::tools::{CostClass, Tool};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Model that replays one scripted event round per `stream_chat` call.
    struct ScriptedModel {
        rounds: Mutex<Vec<Vec<ChatEvent>>>,
    }

    impl ScriptedModel {
        fn new(rounds: Vec<Vec<ChatEvent>>) -> Arc<Self> {
            Arc::new(Self {
                rounds: Mutex::new(rounds),
            })
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn provider(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        async fn stream_chat(&self, _request: ChatRequest) -> Result<ChatStream> {
            let round = {
                let mut rounds = self.rounds.lock().unwrap_or_else(|e| e.into_inner());
                if rounds.is_empty() {
                    vec![ChatEvent::Final {
                        text: String::new(),
                        usage: UsageMetadata::default(),
                    }]
                } else {
                    rounds.remove(0)
                }
            };
            let stream = futures::stream::iter(round.into_iter().map(Ok));
            Ok(Box::pin(stream))
        }
    }

    struct StaticTool {
        name: &'static str,
        fail_fatal: bool,
    }

    #[async_trait]
    impl Tool for StaticTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "test tool"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn output_schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn cost_class(&self) -> CostClass {
            CostClass::Cheap
        }

        async fn execute(&self, _input: Value, _context: &ToolContext) -> Result<Value> {
            if self.fail_fatal {
                Err(Error::tool_fatal(self.name, "backing service gone"))
            } else {
                Ok(json!({"ok": true}))
            }
        }
    }

    fn engine_with(tools: Vec<StaticTool>) -> ToolLoopEngine {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(Arc::new(tool));
        }
        ToolLoopEngine::new(Arc::new(registry))
    }

    fn request(stop_policy: StopPolicy) -> ToolLoopRequest {
        ToolLoopRequest {
            user_id: "u-42".into(),
            session_id: None,
            system_prompt: "You plan trips.".into(),
            messages: vec![ChatMessage::user("Plan a weekend in Lisbon")],
            tool_names: vec!["lookup".into()],
            stop_policy,
        }
    }

    fn tool_call(id: &str, name: &str) -> ChatEvent {
        ChatEvent::ToolCall(ToolCallRequest {
            id: id.into(),
            name: name.into(),
            input: json!({}),
        })
    }

    async fn collect(stream: ReceiverStream<AgentEvent>) -> Vec<AgentEvent> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_simple_reply_stream_shape() {
        let model = ScriptedModel::new(vec![vec![
            ChatEvent::Delta("Lis".into()),
            ChatEvent::Delta("bon!".into()),
            ChatEvent::Final {
                text: "Lisbon!".into(),
                usage: UsageMetadata::new(10, 2),
            },
        ]]);
        let engine = engine_with(vec![]);
        let events = collect(engine.run(model, request(StopPolicy::default()))).await;

        assert!(matches!(&events[0], AgentEvent::Started { user } if user == "u-42"));
        assert!(matches!(&events[1], AgentEvent::Delta { content } if content == "Lis"));
        match events.last().unwrap() {
            AgentEvent::Final { content, usage } => {
                assert_eq!(content, "Lisbon!");
                assert_eq!(usage.prompt_tokens, 10);
            }
            other => panic!("expected final, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tool_round_then_final() {
        let model = ScriptedModel::new(vec![
            vec![
                tool_call("c1", "lookup"),
                ChatEvent::Final {
                    text: String::new(),
                    usage: UsageMetadata::new(5, 1),
                },
            ],
            vec![
                ChatEvent::Delta("Done".into()),
                ChatEvent::Final {
                    text: "Done".into(),
                    usage: UsageMetadata::new(7, 3),
                },
            ],
        ]);
        let engine = engine_with(vec![StaticTool {
            name: "lookup",
            fail_fatal: false,
        }]);
        let events = collect(engine.run(model, request(StopPolicy::default()))).await;

        let tool_results: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, AgentEvent::ToolResult { .. }))
            .collect();
        assert_eq!(tool_results.len(), 1);
        match tool_results[0] {
            AgentEvent::ToolResult {
                sequence_index,
                output,
                error,
                ..
            } => {
                assert_eq!(*sequence_index, 0);
                assert!(output.is_some());
                assert!(error.is_none());
            }
            _ => unreachable!(),
        }
        match events.last().unwrap() {
            AgentEvent::Final { usage, .. } => assert_eq!(usage.prompt_tokens, 12),
            other => panic!("expected final, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ceiling_zero_exhausts_after_first_tool() {
        let model = ScriptedModel::new(vec![vec![
            tool_call("c1", "lookup"),
            ChatEvent::Final {
                text: String::new(),
                usage: UsageMetadata::default(),
            },
        ]]);
        let engine = engine_with(vec![StaticTool {
            name: "lookup",
            fail_fatal: false,
        }]);
        let policy = StopPolicy {
            max_tool_calls: 0,
            ..StopPolicy::default()
        };
        let events = collect(engine.run(model, request(policy))).await;

        // The first tool still runs; the ceiling is enforced right after.
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::ToolResult { .. })));
        match events.last().unwrap() {
            AgentEvent::Error { code, .. } => assert_eq!(code, "STOP_POLICY_EXHAUSTED"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fatal_tool_error_wins_tie_break() {
        let model = ScriptedModel::new(vec![vec![
            tool_call("c1", "lookup"),
            ChatEvent::Final {
                text: String::new(),
                usage: UsageMetadata::default(),
            },
        ]]);
        let engine = engine_with(vec![StaticTool {
            name: "lookup",
            fail_fatal: true,
        }]);
        // Ceiling of 1 also holds after the call; the fatal error must win.
        let policy = StopPolicy {
            max_tool_calls: 1,
            ..StopPolicy::default()
        };
        let events = collect(engine.run(model, request(policy))).await;
        match events.last().unwrap() {
            AgentEvent::Error { code, message } => {
                assert_eq!(code, "TOOL_EXECUTION");
                assert!(message.contains("backing service gone"));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_synthetic_result_and_loop_continues() {
        let model = ScriptedModel::new(vec![
            vec![
                tool_call("c1", "ghost"),
                ChatEvent::Final {
                    text: String::new(),
                    usage: UsageMetadata::default(),
                },
            ],
            vec![ChatEvent::Final {
                text: "recovered".into(),
                usage: UsageMetadata::default(),
            }],
        ]);
        let engine = engine_with(vec![]);
        let events = collect(engine.run(model, request(StopPolicy::default()))).await;

        let has_validation_error = events.iter().any(|e| {
            matches!(
                e,
                AgentEvent::ToolResult {
                    error: Some(err), ..
                } if err.code == "TOOL_VALIDATION"
            )
        });
        assert!(has_validation_error);
        assert!(matches!(
            events.last().unwrap(),
            AgentEvent::Final { content, .. } if content == "recovered"
        ));
    }

    #[tokio::test]
    async fn test_collect_final_maps_stop_policy() {
        let model = ScriptedModel::new(vec![vec![
            tool_call("c1", "lookup"),
            ChatEvent::Final {
                text: String::new(),
                usage: UsageMetadata::default(),
            },
        ]]);
        let engine = engine_with(vec![StaticTool {
            name: "lookup",
            fail_fatal: false,
        }]);
        let policy = StopPolicy {
            max_tool_calls: 0,
            ..StopPolicy::default()
        };
        let result = collect_final(engine.run(model, request(policy))).await;
        assert!(matches!(result, Err(Error::StopPolicyExhausted(_))));
    }
}
