//! Chat streaming wire format
//!
//! Each wire event is one `data: <json>` SSE frame; the stream always ends
//! with the literal `data: [DONE]` sentinel. An `error` event, when present,
//! is the last non-sentinel event.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use tripsage_core::AgentEvent;

/// Terminal sentinel line payload.
pub const DONE_SENTINEL: &str = "[DONE]";

/// JSON payload for one wire event.
pub fn agent_event_json(event: &AgentEvent) -> Value {
    match event {
        AgentEvent::Started { user } => json!({"type": "started", "user": user}),
        AgentEvent::Delta { content } => json!({"type": "delta", "content": content}),
        AgentEvent::ToolCall { name, input } => {
            json!({"type": "tool-call", "name": name, "input": input})
        }
        AgentEvent::ToolResult {
            name,
            output,
            error,
            ..
        } => match error {
            Some(err) => json!({
                "type": "tool-result",
                "name": name,
                "error": {"code": err.code, "message": err.message},
            }),
            None => json!({"type": "tool-result", "name": name, "output": output}),
        },
        AgentEvent::Final { content, usage } => json!({
            "type": "final",
            "content": content,
            "usage": {
                "prompt_tokens": usage.prompt_tokens,
                "completion_tokens": usage.completion_tokens,
            },
        }),
        AgentEvent::Error { code, message } => {
            json!({"type": "error", "code": code, "message": message})
        }
    }
}

/// Render an event stream as the SSE response, appending the sentinel.
pub fn sse_response<S>(events: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = AgentEvent> + Send + 'static,
{
    let framed = async_stream::stream! {
        let mut events = std::pin::pin!(events);
        let mut count = 0usize;
        while let Some(event) = events.next().await {
            count += 1;
            let terminal = matches!(event, AgentEvent::Error { .. });
            yield Ok(Event::default().data(agent_event_json(&event).to_string()));
            if terminal {
                break;
            }
        }
        crate::metrics::record_stream_events(count);
        yield Ok(Event::default().data(DONE_SENTINEL));
    };
    Sse::new(framed).keep_alive(KeepAlive::default())
}
