//! Tool catalog and validated execution
//!
//! Tools are registered once at process boot into a [`ToolRegistry`]. The
//! registry owns schema validation (input and output) and the per-tool
//! execution timeout; tool implementations own their caching.

use crate::error::{Error, Result};
use crate::language_models::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Per-invocation cost classification, used for budgeting and telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostClass {
    Cheap,
    Standard,
    Expensive,
}

/// Request-scoped context handed to tool executions.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: String,
    pub session_id: Option<Uuid>,
}

/// A callable tool with typed input/output contracts.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name; the model addresses the tool by this
    fn name(&self) -> &str;

    /// Natural-language description shown to the model
    fn description(&self) -> &str;

    /// JSON Schema the input must satisfy
    fn input_schema(&self) -> Value;

    /// JSON Schema the output must satisfy
    fn output_schema(&self) -> Value;

    /// Execution budget; exceeding it yields a `TOOL_TIMEOUT` result
    fn timeout(&self) -> Duration {
        Duration::from_millis(5_000)
    }

    /// Cost classification for budgeting
    fn cost_class(&self) -> CostClass {
        CostClass::Standard
    }

    /// Execute with already-validated input.
    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value>;
}

/// Outcome of one validated tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub tool: String,
    pub result: std::result::Result<Value, ToolFailure>,
    pub duration: Duration,
    pub cost_class: CostClass,
}

/// A tool failure surfaced to the model as a synthetic tool-result.
#[derive(Debug, Clone)]
pub struct ToolFailure {
    pub code: &'static str,
    pub message: String,
    /// Unrecoverable failures terminate the loop (stop policy condition d)
    pub stop_worthy: bool,
}

impl ToolFailure {
    fn from_error(err: &Error) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            stop_worthy: err.is_stop_worthy(),
        }
    }
}

/// Process-wide mapping from tool name to implementation.
///
/// Read-mostly: built at startup, shared behind `Arc`, never mutated during
/// request lifetime.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Later registrations replace earlier ones by name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Model-facing definitions for a workflow's whitelist.
    ///
    /// Unknown names are skipped; a workflow whitelist referencing a tool
    /// missing from the registry is a startup configuration defect, not a
    /// request-time error.
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| self.get(name))
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// Validate input, execute under the declared timeout, validate output.
    ///
    /// All failure modes are folded into [`ToolOutcome::result`]; the caller
    /// (the tool-loop engine) converts failures into synthetic tool-result
    /// parts rather than propagating them.
    pub async fn execute(&self, name: &str, input: Value, context: &ToolContext) -> ToolOutcome {
        let started = Instant::now();
        let Some(tool) = self.get(name) else {
            return ToolOutcome {
                tool: name.to_string(),
                result: Err(ToolFailure {
                    code: "TOOL_VALIDATION",
                    message: format!("unknown tool '{name}'"),
                    stop_worthy: false,
                }),
                duration: started.elapsed(),
                cost_class: CostClass::Standard,
            };
        };
        let cost_class = tool.cost_class();

        if let Err(err) = validate_against(&tool.input_schema(), &input, name, "input") {
            return ToolOutcome {
                tool: name.to_string(),
                result: Err(ToolFailure::from_error(&err)),
                duration: started.elapsed(),
                cost_class,
            };
        }

        let timeout = tool.timeout();
        let executed = tokio::time::timeout(timeout, tool.execute(input, context)).await;

        let result = match executed {
            Err(_elapsed) => Err(ToolFailure::from_error(&Error::ToolTimeout {
                tool: name.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })),
            Ok(Err(err)) => Err(ToolFailure::from_error(&err)),
            Ok(Ok(output)) => {
                match validate_against(&tool.output_schema(), &output, name, "output") {
                    Ok(()) => Ok(output),
                    Err(err) => Err(ToolFailure::from_error(&err)),
                }
            }
        };

        ToolOutcome {
            tool: name.to_string(),
            result,
            duration: started.elapsed(),
            cost_class,
        }
    }
}

/// Validate `instance` against `schema`, mapping failures to `TOOL_VALIDATION`.
fn validate_against(schema: &Value, instance: &Value, tool: &str, direction: &str) -> Result<()> {
    let validator = jsonschema::validator_for(schema).map_err(|e| Error::ToolValidation {
        tool: tool.to_string(),
        message: format!("invalid {direction} schema: {e}"),
    })?;
    if validator.is_valid(instance) {
        return Ok(());
    }
    let details: Vec<String> = validator
        .iter_errors(instance)
        .map(|e| e.to_string())
        .take(5)
        .collect();
    Err(Error::ToolValidation {
        tool: tool.to_string(),
        message: format!("{direction} failed schema: {}", details.join("; ")),
    })
}
