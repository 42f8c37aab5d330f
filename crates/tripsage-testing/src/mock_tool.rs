//! Mock tool for exercising the tool loop

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tripsage_core::tools::{CostClass, Tool, ToolContext};
use tripsage_core::{Error, Result};

type Handler = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// A configurable tool double.
///
/// ```rust
/// use tripsage_testing::MockTool;
///
/// let tool = MockTool::new("geo_lookup")
///     .with_response(serde_json::json!({"lat": 38.7, "lon": -9.1}));
/// ```
#[derive(Clone)]
pub struct MockTool {
    name: String,
    description: String,
    input_schema: Value,
    output_schema: Value,
    timeout: Duration,
    cost_class: CostClass,
    handler: Option<Handler>,
    fixed_response: Value,
    fail_next: Arc<Mutex<bool>>,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl std::fmt::Debug for MockTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTool")
            .field("name", &self.name)
            .field("call_count", &self.call_count())
            .finish()
    }
}

impl MockTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: "A mock tool for testing".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: serde_json::json!({"type": "object"}),
            timeout: Duration::from_millis(1_000),
            cost_class: CostClass::Cheap,
            handler: None,
            fixed_response: serde_json::json!({"ok": true}),
            fail_next: Arc::new(Mutex::new(false)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cost_class(mut self, cost_class: CostClass) -> Self {
        self.cost_class = cost_class;
        self
    }

    pub fn with_response(mut self, response: Value) -> Self {
        self.fixed_response = response;
        self
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Fail the next execution with a recoverable tool error.
    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn inputs(&self) -> Vec<Value> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
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
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(input.clone());

        {
            let mut fail = self.fail_next.lock().unwrap_or_else(|e| e.into_inner());
            if *fail {
                *fail = false;
                return Err(Error::tool_error(&self.name, "mock tool failure"));
            }
        }

        match &self.handler {
            Some(handler) => handler(&input),
            None => Ok(self.fixed_response.clone()),
        }
    }
}
