//! Workflow catalog
//!
//! One [`WorkflowSpec`] per workflow kind: input schema, tool whitelist,
//! stop policy, and prompt builder. Handlers are data, not subclasses, so the
//! set stays exhaustively checkable against [`WorkflowKind`].

use crate::engine::StopPolicy;
use crate::error::{Error, Result};
use crate::router::WorkflowKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

/// Validated request body for a workflow invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    /// The user's message for this turn
    pub message: String,
    /// Session to thread context through; omitted for one-shot calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    /// Workflow-specific structured parameters
    #[serde(default)]
    pub params: Value,
}

/// Static description of one workflow.
#[derive(Debug, Clone)]
pub struct WorkflowSpec {
    pub kind: WorkflowKind,
    /// Tools from the registry this workflow may call
    pub tool_names: Vec<String>,
    pub stop_policy: StopPolicy,
    /// Schema for the request body of `/api/agents/{workflow}`
    pub input_schema: Value,
    /// Agent persona and task framing, without user-specific content
    system_prompt: &'static str,
}

impl WorkflowSpec {
    /// Build the per-request system prompt from stored user preferences.
    pub fn build_system_prompt(&self, preferences: Option<&Value>, context: Option<&str>) -> String {
        let mut prompt = String::from(self.system_prompt);
        if let Some(prefs) = preferences {
            if !prefs.is_null() {
                prompt.push_str("\n\nTraveler preferences:\n");
                prompt.push_str(&prefs.to_string());
            }
        }
        if let Some(context) = context {
            if !context.is_empty() {
                prompt.push_str("\n\nRelevant prior conversation:\n");
                prompt.push_str(context);
            }
        }
        prompt
    }

    /// Validate a request body against this workflow's input schema.
    pub fn validate_request(&self, body: &Value) -> Result<WorkflowRequest> {
        let validator = jsonschema::validator_for(&self.input_schema)
            .map_err(|e| Error::internal(format!("workflow input schema invalid: {e}")))?;
        if !validator.is_valid(body) {
            let details: Vec<Value> = validator
                .iter_errors(body)
                .map(|e| json!({"path": e.instance_path.to_string(), "error": e.to_string()}))
                .take(8)
                .collect();
            return Err(Error::invalid_input_with_details(
                "request body failed workflow input schema",
                Value::Array(details),
            ));
        }
        serde_json::from_value(body.clone())
            .map_err(|e| Error::invalid_input(format!("request body malformed: {e}")))
    }
}

fn base_input_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "message": {"type": "string", "minLength": 1},
            "session_id": {"type": "string", "format": "uuid"},
            "params": {"type": "object"}
        },
        "required": ["message"],
        "additionalProperties": false
    })
}

/// The full workflow catalog, one spec per kind.
pub fn workflow_catalog() -> Vec<WorkflowSpec> {
    WorkflowKind::ALL.iter().map(|kind| spec_for(*kind)).collect()
}

/// Static spec for a workflow kind.
pub fn spec_for(kind: WorkflowKind) -> WorkflowSpec {
    match kind {
        WorkflowKind::DestinationResearch => WorkflowSpec {
            kind,
            tool_names: vec!["geo_lookup".into(), "web_search".into()],
            stop_policy: StopPolicy {
                max_tool_calls: 6,
                deadline: Duration::from_secs(90),
            },
            input_schema: base_input_schema(),
            system_prompt: "You are a destination research specialist. Research \
destinations matching the traveler's interests, constraints, and season. Use \
the available tools for factual lookups and cite concrete findings.",
        },
        WorkflowKind::FlightSearch => WorkflowSpec {
            kind,
            tool_names: vec!["flight_search".into(), "geo_lookup".into()],
            stop_policy: StopPolicy {
                max_tool_calls: 6,
                deadline: Duration::from_secs(90),
            },
            input_schema: base_input_schema(),
            system_prompt: "You are a flight search specialist. Resolve airports, \
search real itineraries with the flight tool, and present options with times, \
carriers, and fares. Never invent flight data.",
        },
        WorkflowKind::AccommodationSearch => WorkflowSpec {
            kind,
            tool_names: vec!["accommodation_search".into(), "geo_lookup".into()],
            stop_policy: StopPolicy {
                max_tool_calls: 6,
                deadline: Duration::from_secs(90),
            },
            input_schema: base_input_schema(),
            system_prompt: "You are an accommodation specialist. Search stays with \
the accommodation tool, filtered by dates, budget, and neighborhood, and \
summarize trade-offs between the top options.",
        },
        WorkflowKind::ItineraryPlanning => WorkflowSpec {
            kind,
            // Itineraries compose the other domains, so this workflow gets the
            // widest whitelist and the highest ceiling.
            tool_names: vec![
                "geo_lookup".into(),
                "web_search".into(),
                "flight_search".into(),
                "accommodation_search".into(),
                "currency_convert".into(),
            ],
            stop_policy: StopPolicy {
                max_tool_calls: 12,
                deadline: Duration::from_secs(180),
            },
            input_schema: base_input_schema(),
            system_prompt: "You are an itinerary planner. Produce a day-by-day plan \
that sequences travel, stays, and activities realistically, checking facts \
with tools where needed.",
        },
        WorkflowKind::BudgetPlanning => WorkflowSpec {
            kind,
            tool_names: vec!["currency_convert".into(), "web_search".into()],
            stop_policy: StopPolicy {
                max_tool_calls: 5,
                deadline: Duration::from_secs(60),
            },
            input_schema: base_input_schema(),
            system_prompt: "You are a travel budget planner. Estimate costs per \
category, convert currencies with the conversion tool, and present a total \
with a contingency margin.",
        },
        WorkflowKind::MemoryUpdate => WorkflowSpec {
            kind,
            tool_names: vec!["memory_search".into()],
            stop_policy: StopPolicy {
                max_tool_calls: 3,
                deadline: Duration::from_secs(30),
            },
            input_schema: base_input_schema(),
            system_prompt: "You maintain the traveler's long-term preferences. \
Identify durable facts in the message (likes, constraints, loyalty programs) \
and restate what you will remember.",
        },
        WorkflowKind::GeneralChat => WorkflowSpec {
            kind,
            tool_names: vec!["memory_search".into(), "web_search".into()],
            stop_policy: StopPolicy {
                max_tool_calls: 4,
                deadline: Duration::from_secs(60),
            },
            input_schema: base_input_schema(),
            system_prompt: "You are TripSage, a helpful travel assistant. Answer \
conversationally; use tools only when the answer needs a factual lookup.",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_covers_all_kinds() {
        let catalog = workflow_catalog();
        assert_eq!(catalog.len(), WorkflowKind::ALL.len());
        for kind in WorkflowKind::ALL {
            assert!(catalog.iter().any(|spec| spec.kind == kind));
        }
    }

    #[test]
    fn test_itinerary_has_higher_ceiling_than_destinations() {
        let itinerary = spec_for(WorkflowKind::ItineraryPlanning);
        let destinations = spec_for(WorkflowKind::DestinationResearch);
        assert!(itinerary.stop_policy.max_tool_calls > destinations.stop_policy.max_tool_calls);
    }

    #[test]
    fn test_validate_request_accepts_minimal_body() {
        let spec = spec_for(WorkflowKind::FlightSearch);
        let request = spec
            .validate_request(&json!({"message": "JFK to NRT on 2025-04-01"}))
            .unwrap();
        assert!(request.session_id.is_none());
        assert_eq!(request.message, "JFK to NRT on 2025-04-01");
    }

    #[test]
    fn test_validate_request_rejects_empty_message() {
        let spec = spec_for(WorkflowKind::GeneralChat);
        let err = spec.validate_request(&json!({"message": ""})).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn test_validate_request_rejects_unknown_fields() {
        let spec = spec_for(WorkflowKind::GeneralChat);
        let err = spec
            .validate_request(&json!({"message": "hi", "admin": true}))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn test_prompt_builder_includes_preferences_and_context() {
        let spec = spec_for(WorkflowKind::BudgetPlanning);
        let prefs = json!({"currency": "EUR"});
        let prompt = spec.build_system_prompt(Some(&prefs), Some("prior trip to Porto"));
        assert!(prompt.contains("budget planner"));
        assert!(prompt.contains("EUR"));
        assert!(prompt.contains("Porto"));
    }

    #[test]
    fn test_prompt_builder_skips_null_preferences() {
        let spec = spec_for(WorkflowKind::GeneralChat);
        let prompt = spec.build_system_prompt(Some(&Value::Null), None);
        assert!(!prompt.contains("preferences"));
    }
}
