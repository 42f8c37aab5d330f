//! Mock chat model replaying scripted rounds

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tripsage_core::{
    ChatEvent, ChatModel, ChatRequest, ChatStream, Error, Result, ToolCallRequest, UsageMetadata,
};

/// One scripted model round: the events `stream_chat` will yield.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRound {
    events: Vec<ChatEvent>,
    fail_before_stream: bool,
}

impl ScriptedRound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text delta.
    pub fn delta(mut self, fragment: impl Into<String>) -> Self {
        self.events.push(ChatEvent::Delta(fragment.into()));
        self
    }

    /// Append a tool call request.
    pub fn tool_call(mut self, id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        self.events.push(ChatEvent::ToolCall(ToolCallRequest {
            id: id.into(),
            name: name.into(),
            input,
        }));
        self
    }

    /// Append the terminal event with usage.
    pub fn finish(mut self, text: impl Into<String>, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.events.push(ChatEvent::Final {
            text: text.into(),
            usage: UsageMetadata::new(prompt_tokens, completion_tokens),
        });
        self
    }

    /// Make `stream_chat` itself fail for this round.
    pub fn unavailable(mut self) -> Self {
        self.fail_before_stream = true;
        self
    }
}

/// A chat model that replays one scripted round per `stream_chat` call.
///
/// Once the script is exhausted, further calls yield an empty final message.
#[derive(Clone)]
pub struct MockChatModel {
    rounds: Arc<Mutex<Vec<ScriptedRound>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockChatModel {
    pub fn new(rounds: Vec<ScriptedRound>) -> Self {
        Self {
            rounds: Arc::new(Mutex::new(rounds)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A model that replies with a single text message.
    pub fn single_reply(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(vec![ScriptedRound::new()
            .delta(text.clone())
            .finish(text, 10, 5)])
    }

    /// Requests observed so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-chat-1"
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        let round = {
            let mut rounds = self.rounds.lock().unwrap_or_else(|e| e.into_inner());
            if rounds.is_empty() {
                ScriptedRound::new().finish("", 0, 0)
            } else {
                rounds.remove(0)
            }
        };
        if round.fail_before_stream {
            return Err(Error::ProviderUnavailable("mock provider offline".into()));
        }
        let stream = futures::stream::iter(round.events.into_iter().map(Ok));
        Ok(Box::pin(stream))
    }
}
