//! Agent router: classifies a user message into a workflow
//!
//! The router invokes the model in structured-output mode against a closed
//! schema. Confidence-based fallback (below 0.5 routes to `general_chat`)
//! belongs to the caller, not the router.

use crate::error::Result;
use crate::language_models::{ChatEvent, ChatRequest, ModelHandle};
use crate::messages::ChatMessage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::StreamExt;
use tracing::instrument;

/// Closed set of workflow classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    DestinationResearch,
    FlightSearch,
    AccommodationSearch,
    ItineraryPlanning,
    BudgetPlanning,
    MemoryUpdate,
    GeneralChat,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 7] = [
        WorkflowKind::DestinationResearch,
        WorkflowKind::FlightSearch,
        WorkflowKind::AccommodationSearch,
        WorkflowKind::ItineraryPlanning,
        WorkflowKind::BudgetPlanning,
        WorkflowKind::MemoryUpdate,
        WorkflowKind::GeneralChat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::DestinationResearch => "destination_research",
            WorkflowKind::FlightSearch => "flight_search",
            WorkflowKind::AccommodationSearch => "accommodation_search",
            WorkflowKind::ItineraryPlanning => "itinerary_planning",
            WorkflowKind::BudgetPlanning => "budget_planning",
            WorkflowKind::MemoryUpdate => "memory_update",
            WorkflowKind::GeneralChat => "general_chat",
        }
    }

    /// Route segment used by `/api/agents/{workflow}`.
    pub fn route_segment(&self) -> &'static str {
        match self {
            WorkflowKind::DestinationResearch => "destinations",
            WorkflowKind::FlightSearch => "flights",
            WorkflowKind::AccommodationSearch => "accommodations",
            WorkflowKind::ItineraryPlanning => "itineraries",
            WorkflowKind::BudgetPlanning => "budget",
            WorkflowKind::MemoryUpdate => "memory",
            WorkflowKind::GeneralChat => "chat",
        }
    }

    pub fn from_route_segment(segment: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.route_segment() == segment)
    }
}

/// Router classification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterDecision {
    pub workflow: WorkflowKind,
    /// Classifier confidence in [0, 1]
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl RouterDecision {
    /// Caller-side fallback policy: below 0.5 the caller uses general chat.
    pub fn effective_workflow(&self) -> WorkflowKind {
        if self.confidence < 0.5 {
            WorkflowKind::GeneralChat
        } else {
            self.workflow
        }
    }
}

/// JSON schema the classifier output must satisfy.
fn decision_schema() -> Value {
    let kinds: Vec<&str> = WorkflowKind::ALL.iter().map(|k| k.as_str()).collect();
    json!({
        "type": "object",
        "properties": {
            "workflow": {"type": "string", "enum": kinds},
            "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
            "reasoning": {"type": "string"}
        },
        "required": ["workflow", "confidence"],
        "additionalProperties": false
    })
}

const ROUTER_SYSTEM_PROMPT: &str = "You are a request classifier for a travel assistant. \
Classify the user's latest message into exactly one workflow and report your \
confidence. Consider conversation context when provided. Respond only with the \
requested JSON object.";

/// Structured-output classifier over the workflow set.
#[derive(Debug, Clone, Default)]
pub struct AgentRouter;

impl AgentRouter {
    pub fn new() -> Self {
        Self
    }

    /// Classify `message`, optionally with recent session context.
    ///
    /// Any parse failure degrades to `general_chat` with confidence 0 rather
    /// than failing the request.
    #[instrument(skip_all, fields(message_len = message.len()))]
    pub async fn classify(
        &self,
        model: &ModelHandle,
        message: &str,
        context: Option<&str>,
    ) -> Result<RouterDecision> {
        let mut messages = Vec::with_capacity(2);
        if let Some(context) = context {
            messages.push(ChatMessage::system(format!(
                "Recent conversation context:\n{context}"
            )));
        }
        messages.push(ChatMessage::user(message));

        let request = ChatRequest {
            system: ROUTER_SYSTEM_PROMPT.to_string(),
            messages,
            tools: Vec::new(),
            response_schema: Some(decision_schema()),
        };

        let mut stream = model.stream_chat(request).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ChatEvent::Delta(fragment) => text.push_str(&fragment),
                ChatEvent::Final { text: final_text, .. } => {
                    if !final_text.is_empty() {
                        text = final_text;
                    }
                }
                ChatEvent::ToolCall(_) => {}
            }
        }

        Ok(parse_decision(&text))
    }
}

fn parse_decision(text: &str) -> RouterDecision {
    match serde_json::from_str::<RouterDecision>(text.trim()) {
        Ok(decision) => RouterDecision {
            confidence: decision.confidence.clamp(0.0, 1.0),
            ..decision
        },
        Err(_) => RouterDecision {
            workflow: WorkflowKind::GeneralChat,
            confidence: 0.0,
            reasoning: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_kind_round_trips_route_segments() {
        for kind in WorkflowKind::ALL {
            if kind == WorkflowKind::GeneralChat {
                continue;
            }
            assert_eq!(
                WorkflowKind::from_route_segment(kind.route_segment()),
                Some(kind)
            );
        }
        assert_eq!(WorkflowKind::from_route_segment("nonsense"), None);
    }

    #[test]
    fn test_parse_decision_valid() {
        let decision = parse_decision(
            r#"{"workflow":"flight_search","confidence":0.91,"reasoning":"mentions JFK to NRT"}"#,
        );
        assert_eq!(decision.workflow, WorkflowKind::FlightSearch);
        assert!(decision.confidence > 0.9);
        assert_eq!(decision.effective_workflow(), WorkflowKind::FlightSearch);
    }

    #[test]
    fn test_parse_decision_garbage_degrades_to_general_chat() {
        let decision = parse_decision("I think this is about flights");
        assert_eq!(decision.workflow, WorkflowKind::GeneralChat);
        assert_eq!(decision.confidence, 0.0);
    }

    #[test]
    fn test_parse_decision_clamps_confidence() {
        let decision = parse_decision(r#"{"workflow":"budget_planning","confidence":1.7}"#);
        assert!((decision.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_low_confidence_falls_back() {
        let decision = RouterDecision {
            workflow: WorkflowKind::ItineraryPlanning,
            confidence: 0.35,
            reasoning: None,
        };
        assert_eq!(decision.effective_workflow(), WorkflowKind::GeneralChat);
    }

    #[test]
    fn test_decision_schema_enumerates_all_kinds() {
        let schema = decision_schema();
        let enumeration = schema["properties"]["workflow"]["enum"].as_array().unwrap();
        assert_eq!(enumeration.len(), WorkflowKind::ALL.len());
    }
}
