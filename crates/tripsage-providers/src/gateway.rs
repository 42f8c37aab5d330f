//! OpenAI-compatible provider client
//!
//! One client covers both BYOK providers and the fallback gateway: they all
//! speak the `/chat/completions` + `/embeddings` surface, differing only in
//! base URL and credential. Streaming uses SSE chunk parsing.

use async_stream::try_stream;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tripsage_core::{
    ChatEvent, ChatModel, ChatRequest, ChatStream, Embeddings, Error, Result, Role,
    ToolCallRequest, UsageMetadata,
};

/// Connection coordinates for one OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct ProviderEndpoint {
    pub provider: String,
    pub base_url: String,
    pub api_key: SecretString,
}

impl std::fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // api_key intentionally omitted
        f.debug_struct("ProviderEndpoint")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Chat model speaking the OpenAI-compatible wire protocol.
pub struct OpenAiCompatibleModel {
    http: reqwest::Client,
    endpoint: ProviderEndpoint,
    model: String,
}

impl OpenAiCompatibleModel {
    pub fn new(http: reqwest::Client, endpoint: ProviderEndpoint, model: impl Into<String>) -> Self {
        Self {
            http,
            endpoint,
            model: model.into(),
        }
    }

    fn chat_body(&self, request: &ChatRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(json!({"role": "system", "content": request.system}));
        }
        for message in &request.messages {
            messages.push(wire_message(message));
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.input_schema,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(schema) = &request.response_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {"name": "response", "strict": true, "schema": schema},
            });
        }
        body
    }
}

fn wire_message(message: &tripsage_core::ChatMessage) -> Value {
    match message.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content,
        }),
        Role::Assistant if !message.tool_calls.is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.input.to_string(),
                        }
                    })
                })
                .collect();
            json!({
                "role": "assistant",
                "content": message.content,
                "tool_calls": calls,
            })
        }
        role => json!({"role": role.as_str(), "content": message.content}),
    }
}

/// One streamed completion chunk, fields we consume only.
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: WireDelta,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Tool-call fragments accumulated across chunks, keyed by call index.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

#[async_trait::async_trait]
impl ChatModel for OpenAiCompatibleModel {
    fn provider(&self) -> &str {
        &self.endpoint.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream> {
        let url = format!("{}/chat/completions", self.endpoint.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.endpoint.api_key.expose_secret())
            .json(&self.chat_body(&request))
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            // Body intentionally not forwarded: upstream error strings may
            // carry key material or account identifiers.
            return Err(Error::ProviderUnavailable(format!(
                "provider returned status {status}"
            )));
        }

        let mut events = response.bytes_stream().eventsource();
        let stream = try_stream! {
            let mut text = String::new();
            let mut calls: BTreeMap<u32, ToolCallAccumulator> = BTreeMap::new();
            let mut usage = UsageMetadata::default();

            while let Some(event) = events.next().await {
                let event = event.map_err(|e| {
                    Error::ProviderUnavailable(format!("stream read failed: {e}"))
                })?;
                if event.data.trim() == "[DONE]" {
                    break;
                }
                let chunk: StreamChunk = serde_json::from_str(&event.data).map_err(|e| {
                    Error::ProviderUnavailable(format!("malformed stream chunk: {e}"))
                })?;
                if let Some(wire_usage) = chunk.usage {
                    usage = UsageMetadata::new(wire_usage.prompt_tokens, wire_usage.completion_tokens);
                }
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            text.push_str(&content);
                            yield ChatEvent::Delta(content);
                        }
                    }
                    for fragment in choice.delta.tool_calls {
                        let entry = calls.entry(fragment.index).or_default();
                        if let Some(id) = fragment.id {
                            entry.id = id;
                        }
                        if let Some(function) = fragment.function {
                            if let Some(name) = function.name {
                                entry.name = name;
                            }
                            if let Some(arguments) = function.arguments {
                                entry.arguments.push_str(&arguments);
                            }
                        }
                    }
                }
            }

            for (_, call) in calls {
                let input: Value = serde_json::from_str(&call.arguments)
                    .unwrap_or(Value::Object(serde_json::Map::new()));
                yield ChatEvent::ToolCall(ToolCallRequest {
                    id: call.id,
                    name: call.name,
                    input,
                });
            }
            yield ChatEvent::Final { text, usage };
        };
        Ok(Box::pin(stream))
    }
}

/// Embeddings over the same endpoint family.
pub struct OpenAiCompatibleEmbeddings {
    http: reqwest::Client,
    endpoint: ProviderEndpoint,
    model: String,
}

impl OpenAiCompatibleEmbeddings {
    pub fn new(http: reqwest::Client, endpoint: ProviderEndpoint, model: impl Into<String>) -> Self {
        Self {
            http,
            endpoint,
            model: model.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait::async_trait]
impl Embeddings for OpenAiCompatibleEmbeddings {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.endpoint.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.endpoint.api_key.expose_secret())
            .json(&json!({"model": self.model, "input": texts}))
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("embedding request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::ProviderUnavailable(format!(
                "embedding provider returned status {status}"
            )));
        }
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("malformed embedding response: {e}")))?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Probe a credential with the smallest authenticated call (`GET /models`).
///
/// Distinguishes a rejected key from an unreachable provider; never persists
/// anything.
pub async fn probe_credential(
    http: &reqwest::Client,
    base_url: &str,
    service: &str,
    key: &SecretString,
) -> Result<()> {
    let url = format!("{base_url}/models");
    let response = http
        .get(&url)
        .bearer_auth(key.expose_secret())
        .send()
        .await
        .map_err(|e| Error::ProviderUnavailable(format!("validation probe failed: {e}")))?;
    match response.status() {
        status if status.is_success() => Ok(()),
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            Err(Error::InvalidKey(service.to_string()))
        }
        status => Err(Error::ProviderUnavailable(format!(
            "validation probe returned status {status}"
        ))),
    }
}
