//! Built-in tool implementations
//!
//! Registered once at boot. HTTP-backed tools share one client and cache
//! their own results keyed on input; the memory tool wraps the orchestrator.
//! Payload shapes are intentionally thin: the contract is typed input/output
//! plus an execution budget, not the travel-domain detail.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tripsage_core::tools::{CostClass, Tool, ToolContext, ToolRegistry};
use tripsage_core::{Error, Result};
use tripsage_memory::MemoryOrchestrator;

/// A tool that POSTs its input to one backing endpoint and returns the JSON
/// response, with a per-input response cache.
pub struct HttpJsonTool {
    name: &'static str,
    description: &'static str,
    input_schema: Value,
    output_schema: Value,
    url: String,
    timeout: Duration,
    cost_class: CostClass,
    http: reqwest::Client,
    cache: DashMap<String, Value>,
}

impl HttpJsonTool {
    #[allow(clippy::too_many_arguments)]
    fn new(
        name: &'static str,
        description: &'static str,
        input_schema: Value,
        output_schema: Value,
        url: String,
        timeout: Duration,
        cost_class: CostClass,
        http: reqwest::Client,
    ) -> Self {
        Self {
            name,
            description,
            input_schema,
            output_schema,
            url,
            timeout,
            cost_class,
            http,
            cache: DashMap::new(),
        }
    }
}

#[async_trait]
impl Tool for HttpJsonTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    fn output_schema(&self) -> Value {
        self.output_schema.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn cost_class(&self) -> CostClass {
        self.cost_class
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<Value> {
        let cache_key = input.to_string();
        if let Some(hit) = self.cache.get(&cache_key) {
            return Ok(hit.value().clone());
        }
        let response = self
            .http
            .post(&self.url)
            .json(&input)
            .send()
            .await
            .map_err(|e| Error::tool_error(self.name, format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::tool_error(
                self.name,
                format!("backend returned status {status}"),
            ));
        }
        let output: Value = response
            .json()
            .await
            .map_err(|e| Error::tool_error(self.name, format!("malformed response: {e}")))?;
        self.cache.insert(cache_key, output.clone());
        Ok(output)
    }
}

/// Pure currency conversion over a fixed reference table.
pub struct CurrencyConvertTool;

const RATES_PER_USD: &[(&str, f64)] = &[
    ("USD", 1.0),
    ("EUR", 0.92),
    ("GBP", 0.79),
    ("JPY", 149.50),
    ("BRL", 5.04),
    ("CAD", 1.36),
    ("AUD", 1.52),
];

fn rate_for(code: &str) -> Option<f64> {
    RATES_PER_USD
        .iter()
        .find(|(name, _)| *name == code)
        .map(|(_, rate)| *rate)
}

#[async_trait]
impl Tool for CurrencyConvertTool {
    fn name(&self) -> &str {
        "currency_convert"
    }

    fn description(&self) -> &str {
        "Convert an amount between currencies using reference exchange rates"
    }

    fn input_schema(&self) -> Value {
        let codes: Vec<&str> = RATES_PER_USD.iter().map(|(code, _)| *code).collect();
        json!({
            "type": "object",
            "properties": {
                "amount": {"type": "number", "minimum": 0},
                "from": {"type": "string", "enum": codes},
                "to": {"type": "string", "enum": codes}
            },
            "required": ["amount", "from", "to"],
            "additionalProperties": false
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "amount": {"type": "number"},
                "currency": {"type": "string"}
            },
            "required": ["amount", "currency"]
        })
    }

    fn cost_class(&self) -> CostClass {
        CostClass::Cheap
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(100)
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<Value> {
        let amount = input["amount"].as_f64().unwrap_or(0.0);
        let from = input["from"].as_str().unwrap_or_default();
        let to = input["to"].as_str().unwrap_or_default();
        let (Some(from_rate), Some(to_rate)) = (rate_for(from), rate_for(to)) else {
            return Err(Error::tool_error("currency_convert", "unknown currency"));
        };
        let converted = amount / from_rate * to_rate;
        Ok(json!({
            "amount": (converted * 100.0).round() / 100.0,
            "currency": to,
        }))
    }
}

/// Semantic search over the caller's own session memory.
pub struct MemorySearchTool {
    memory: Arc<MemoryOrchestrator>,
}

impl MemorySearchTool {
    pub fn new(memory: Arc<MemoryOrchestrator>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Look up relevant earlier turns from this conversation"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "minLength": 1},
                "limit": {"type": "integer", "minimum": 1, "maximum": 20}
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "turns": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "role": {"type": "string"},
                            "content": {"type": "string"}
                        },
                        "required": ["role", "content"]
                    }
                }
            },
            "required": ["turns"]
        })
    }

    fn cost_class(&self) -> CostClass {
        CostClass::Standard
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value> {
        let Some(session_id) = context.session_id else {
            return Ok(json!({"turns": []}));
        };
        let query = input["query"].as_str().unwrap_or_default().to_string();
        let limit = input["limit"].as_u64().unwrap_or(5) as usize;
        let turns = self
            .memory
            .fetch_context(session_id, &context.user_id, limit, Some(query))
            .await
            .map_err(|e| Error::tool_error("memory_search", e.to_string()))?;
        let entries: Vec<Value> = turns
            .iter()
            .map(|turn| json!({"role": turn.role.as_str(), "content": turn.text_content()}))
            .collect();
        Ok(json!({"turns": entries}))
    }
}

/// Register the built-in tool set.
pub fn register_default_tools(
    registry: &mut ToolRegistry,
    http: reqwest::Client,
    travel_api_base: &str,
    memory: Arc<MemoryOrchestrator>,
) {
    registry.register(Arc::new(HttpJsonTool::new(
        "geo_lookup",
        "Resolve a place name to location facts (coordinates, country, airports)",
        json!({
            "type": "object",
            "properties": {"query": {"type": "string", "minLength": 1}},
            "required": ["query"],
            "additionalProperties": false
        }),
        json!({"type": "object"}),
        format!("{travel_api_base}/geo/lookup"),
        Duration::from_secs(3),
        CostClass::Cheap,
        http.clone(),
    )));

    registry.register(Arc::new(HttpJsonTool::new(
        "web_search",
        "Search the web for travel facts",
        json!({
            "type": "object",
            "properties": {"query": {"type": "string", "minLength": 1}},
            "required": ["query"],
            "additionalProperties": false
        }),
        json!({"type": "object"}),
        format!("{travel_api_base}/search"),
        Duration::from_secs(5),
        CostClass::Standard,
        http.clone(),
    )));

    registry.register(Arc::new(HttpJsonTool::new(
        "flight_search",
        "Search flight itineraries between two airports on a date",
        json!({
            "type": "object",
            "properties": {
                "origin": {"type": "string", "minLength": 3, "maxLength": 3},
                "destination": {"type": "string", "minLength": 3, "maxLength": 3},
                "date": {"type": "string", "format": "date"},
                "passengers": {"type": "integer", "minimum": 1, "default": 1}
            },
            "required": ["origin", "destination", "date"],
            "additionalProperties": false
        }),
        json!({"type": "object"}),
        format!("{travel_api_base}/flights/search"),
        Duration::from_secs(8),
        CostClass::Expensive,
        http.clone(),
    )));

    registry.register(Arc::new(HttpJsonTool::new(
        "accommodation_search",
        "Search stays for a location and date range",
        json!({
            "type": "object",
            "properties": {
                "location": {"type": "string", "minLength": 1},
                "check_in": {"type": "string", "format": "date"},
                "check_out": {"type": "string", "format": "date"},
                "budget_per_night": {"type": "number", "minimum": 0}
            },
            "required": ["location", "check_in", "check_out"],
            "additionalProperties": false
        }),
        json!({"type": "object"}),
        format!("{travel_api_base}/stays/search"),
        Duration::from_secs(8),
        CostClass::Expensive,
        http,
    )));

    registry.register(Arc::new(CurrencyConvertTool));
    registry.register(Arc::new(MemorySearchTool::new(memory)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripsage_memory::{CanonicalStoreAdapter, InMemoryStore};

    fn context() -> ToolContext {
        ToolContext {
            user_id: "u1".into(),
            session_id: None,
        }
    }

    #[tokio::test]
    async fn test_currency_convert_round_trips() {
        let tool = CurrencyConvertTool;
        let out = tool
            .execute(json!({"amount": 100.0, "from": "USD", "to": "EUR"}), &context())
            .await
            .unwrap();
        assert_eq!(out["currency"], "EUR");
        assert!((out["amount"].as_f64().unwrap() - 92.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_currency_convert_identity() {
        let tool = CurrencyConvertTool;
        let out = tool
            .execute(json!({"amount": 55.0, "from": "GBP", "to": "GBP"}), &context())
            .await
            .unwrap();
        assert!((out["amount"].as_f64().unwrap() - 55.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_memory_search_without_session_is_empty() {
        let store = Arc::new(InMemoryStore::default());
        let orchestrator = Arc::new(MemoryOrchestrator::new(vec![Arc::new(
            CanonicalStoreAdapter::new(store, None),
        )]));
        let tool = MemorySearchTool::new(orchestrator);
        let out = tool
            .execute(json!({"query": "hotels"}), &context())
            .await
            .unwrap();
        assert_eq!(out["turns"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_default_registry_contents() {
        let store = Arc::new(InMemoryStore::default());
        let orchestrator = Arc::new(MemoryOrchestrator::new(vec![Arc::new(
            CanonicalStoreAdapter::new(store, None),
        )]));
        let mut registry = ToolRegistry::new();
        register_default_tools(
            &mut registry,
            reqwest::Client::new(),
            "https://travel.example.test",
            orchestrator,
        );
        for name in [
            "geo_lookup",
            "web_search",
            "flight_search",
            "accommodation_search",
            "currency_convert",
            "memory_search",
        ] {
            assert!(registry.contains(name), "missing tool {name}");
        }
    }
}
