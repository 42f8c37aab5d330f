//! Chat endpoints
//!
//! `/api/chat/stream` emits the typed wire stream; `/api/chat` collects the
//! same pipeline into a single JSON message. Both commit the user turn
//! before any model work and the assistant/tool turns as they materialize.

use crate::admission::rate_limit::RouteKey;
use crate::admission::{AdmissionConfig, AuthMode, RequestContext};
use crate::error::{ApiError, ApiResult};
use crate::sse::sse_response;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt;
use tripsage_core::{
    AgentEvent, ChatMessage, ContentPart, Error as CoreError, Role, ToolResultError, Turn,
    WorkflowKind,
};
use uuid::Uuid;

const CHAT_CONFIG: AdmissionConfig = AdmissionConfig {
    auth: AuthMode::Required,
    rate_limit: Some(RouteKey::Chat),
    idempotency: None,
    span: "chat",
};

const CHAT_STREAM_CONFIG: AdmissionConfig = AdmissionConfig {
    auth: AuthMode::Required,
    rate_limit: Some(RouteKey::ChatStream),
    idempotency: None,
    span: "chat:stream",
};

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    role: Role,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    messages: Vec<IncomingMessage>,
    #[serde(default)]
    session_id: Option<Uuid>,
}

fn parse_chat_body(raw: &[u8], ctx: &RequestContext) -> ApiResult<ChatBody> {
    let body: ChatBody = serde_json::from_slice(raw).map_err(|e| {
        ApiError::from_core(
            &CoreError::invalid_input(format!("malformed chat body: {e}")),
            &ctx.request_id,
        )
    })?;
    if body.messages.is_empty() {
        return Err(ApiError::from_core(
            &CoreError::invalid_input("messages must not be empty"),
            &ctx.request_id,
        ));
    }
    if body
        .messages
        .last()
        .is_some_and(|message| message.role != Role::User)
    {
        return Err(ApiError::from_core(
            &CoreError::invalid_input("last message must be from the user"),
            &ctx.request_id,
        ));
    }
    Ok(body)
}

fn to_chat_messages(messages: Vec<IncomingMessage>) -> Vec<ChatMessage> {
    messages
        .into_iter()
        .map(|message| ChatMessage {
            role: message.role,
            content: message.content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        })
        .collect()
}

/// The full chat pipeline as an event stream: memory commit, context fetch,
/// classification, tool loop, and write-behind of tool/assistant turns.
pub(crate) fn chat_events(
    state: AppState,
    user_id: String,
    session_id: Option<Uuid>,
    messages: Vec<ChatMessage>,
    forced_workflow: Option<WorkflowKind>,
) -> impl Stream<Item = AgentEvent> + Send {
    async_stream::stream! {
        let latest = messages
            .last()
            .map(|message| message.content.clone())
            .unwrap_or_default();

        // User turn first; a canonical write failure aborts before any model
        // work and is reported on-stream.
        if let Some(session) = session_id {
            let turn = Turn::text(session, Role::User, latest.clone());
            match state.memory.commit_turn(session, &user_id, turn).await {
                Ok(_) => crate::metrics::record_memory_intent("turn_committed", "ok"),
                Err(err) => {
                    crate::metrics::record_memory_intent("turn_committed", "error");
                    let core: CoreError = err.into();
                    yield AgentEvent::Error {
                        code: core.code().to_string(),
                        message: core.to_string(),
                    };
                    return;
                }
            }
        }

        // Context retrieval is best-effort; an empty context never blocks.
        let context_turns = match session_id {
            Some(session) => state
                .memory
                .fetch_context(
                    session,
                    &user_id,
                    state.settings.context_limit,
                    Some(latest.clone()),
                )
                .await
                .unwrap_or_default(),
            None => Vec::new(),
        };
        let context_text = context_turns
            .iter()
            .map(|turn| format!("{}: {}", turn.role.as_str(), turn.text_content()))
            .collect::<Vec<_>>()
            .join("\n");

        let model = match state.resolver.resolve(&user_id, forced_workflow).await {
            Ok(model) => model,
            Err(err) => {
                yield AgentEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                };
                return;
            }
        };

        let kind = match forced_workflow {
            Some(kind) => kind,
            None => match state
                .router
                .classify(
                    &model,
                    &latest,
                    (!context_text.is_empty()).then_some(context_text.as_str()),
                )
                .await
            {
                Ok(decision) => decision.effective_workflow(),
                Err(err) => {
                    tracing::warn!(error = %err, "router classification failed; using general chat");
                    WorkflowKind::GeneralChat
                }
            },
        };

        let spec = tripsage_core::spec_for(kind);
        let system_prompt = spec.build_system_prompt(
            None,
            (!context_text.is_empty()).then_some(context_text.as_str()),
        );
        let request = tripsage_core::ToolLoopRequest {
            user_id: user_id.clone(),
            session_id,
            system_prompt,
            messages,
            tool_names: spec.tool_names.clone(),
            stop_policy: spec.stop_policy,
        };

        let mut events = state.engine.run(model, request);
        let mut tool_calls = 0usize;
        while let Some(event) = events.next().await {
            match &event {
                AgentEvent::ToolResult {
                    name,
                    output,
                    error,
                    sequence_index,
                } => {
                    tool_calls += 1;
                    if let Some(session) = session_id {
                        let turn = tool_turn(session, name, output.clone(), error.clone(), *sequence_index);
                        if let Err(err) = state.memory.commit_turn(session, &user_id, turn).await {
                            tracing::warn!(error = %err, "tool turn commit failed");
                        }
                    }
                }
                AgentEvent::Final { content, .. } => {
                    if let Some(session) = session_id {
                        if !content.is_empty() {
                            let turn = Turn::text(session, Role::Assistant, content.clone());
                            if let Err(err) = state.memory.commit_turn(session, &user_id, turn).await {
                                tracing::warn!(error = %err, "assistant turn commit failed");
                            }
                        }
                    }
                }
                _ => {}
            }
            yield event;
        }
        crate::metrics::record_tool_calls(tool_calls);
    }
}

fn tool_turn(
    session: Uuid,
    name: &str,
    output: Option<serde_json::Value>,
    error: Option<ToolResultError>,
    sequence_index: u32,
) -> Turn {
    Turn::new(
        session,
        Role::Tool,
        vec![ContentPart::ToolResult {
            id: format!("call-{sequence_index}"),
            name: name.to_string(),
            output,
            error,
        }],
    )
}

/// POST `/api/chat/stream`
pub async fn chat_stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let ctx = state
        .admission
        .admit(CHAT_STREAM_CONFIG, &headers, Some(&body))
        .await?;
    let parsed = parse_chat_body(&body, &ctx)?;
    let user_id = ctx.require_user()?.to_string();

    let events = chat_events(
        state.clone(),
        user_id,
        parsed.session_id,
        to_chat_messages(parsed.messages),
        None,
    );
    crate::metrics::record_request("chat:stream", 200);
    let mut response = sse_response(events).into_response();
    if let Some(rate) = ctx.rate {
        rate.apply_headers(response.headers_mut());
    }
    Ok(response)
}

/// POST `/api/chat` (non-streaming)
pub async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let ctx = state
        .admission
        .admit(CHAT_CONFIG, &headers, Some(&body))
        .await?;
    let parsed = parse_chat_body(&body, &ctx)?;
    let user_id = ctx.require_user()?.to_string();

    let events = chat_events(
        state.clone(),
        user_id,
        parsed.session_id,
        to_chat_messages(parsed.messages),
        None,
    );
    let mut events = std::pin::pin!(events);

    let mut content = None;
    let mut usage = tripsage_core::UsageMetadata::default();
    while let Some(event) = events.next().await {
        match event {
            AgentEvent::Final {
                content: text,
                usage: u,
            } => {
                content = Some(text);
                usage = u;
            }
            AgentEvent::Error { code, message } => {
                crate::metrics::record_request("chat", 502);
                return Err(stream_error_to_api(&code, &message, &ctx.request_id));
            }
            _ => {}
        }
    }

    let content = content.ok_or_else(|| {
        ApiError::internal("stream ended without a final event").with_request_id(ctx.request_id.clone())
    })?;
    crate::metrics::record_request("chat", 200);
    let mut response = (
        StatusCode::OK,
        Json(json!({
            "content": content,
            "usage": {
                "prompt_tokens": usage.prompt_tokens,
                "completion_tokens": usage.completion_tokens,
            },
        })),
    )
        .into_response();
    if let Some(rate) = ctx.rate {
        rate.apply_headers(response.headers_mut());
    }
    Ok(response)
}

/// Map an on-stream error code back to an HTTP envelope for the
/// non-streaming endpoint.
pub(crate) fn stream_error_to_api(code: &str, message: &str, request_id: &str) -> ApiError {
    let status = match code {
        "INVALID_INPUT" => StatusCode::BAD_REQUEST,
        "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
        "FORBIDDEN" => StatusCode::FORBIDDEN,
        "PROVIDER_UNAVAILABLE" | "STOP_POLICY_EXHAUSTED" | "TOOL_EXECUTION" => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let code: &'static str = match code {
        "INVALID_INPUT" => "INVALID_INPUT",
        "UNAUTHORIZED" => "UNAUTHORIZED",
        "FORBIDDEN" => "FORBIDDEN",
        "PROVIDER_UNAVAILABLE" => "PROVIDER_UNAVAILABLE",
        "STOP_POLICY_EXHAUSTED" => "STOP_POLICY_EXHAUSTED",
        "TOOL_EXECUTION" => "TOOL_EXECUTION",
        _ => "INTERNAL",
    };
    let mut err = ApiError::new(status, code, message.to_string());
    err.request_id = request_id.to_string();
    err
}
