//! Tool registry and dispatcher
//!
//! Every operation the model may request is a named [`Tool`] with a JSON
//! Schema input contract. The registry validates input against that schema
//! before dispatch and turns every failure (unknown tool, bad input, I/O)
//! into a `ToolResult { success: false, error }` so the conversation can
//! carry on.
//!
//! ```text
//! ToolCall{name, input} → ToolRegistry::execute
//!                              │ unknown name  → failure result
//!                              │ schema errors → failure result
//!                              ▼
//!                         Tool::execute(input, ctx) → Workspace::resolve → fs / process
//! ```

pub mod complete;
pub mod files;
pub mod shell;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::llm::ToolDefinition;
use crate::metrics::TOOL_CALLS;
use crate::progress::FileMutation;
use crate::workspace::Workspace;

pub use complete::{MarkCompleteTool, COMPLETE_TOOL};
pub use files::{CreateFileTool, EditFileTool, ListFilesTool, ReadFileTool};
pub use shell::{InstallDependenciesTool, RunCommandTool};

/// Bumped whenever a tool is added, removed, or changes its input contract
pub const TOOL_CATALOGUE_VERSION: u32 = 1;

/// Structured outcome of one tool call
///
/// Serializes flat: `{"success": true, "path": "...", ...}`. A failed
/// result always carries a non-empty `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    /// File change to broadcast on the project's file channel
    #[serde(skip)]
    pub mutation: Option<FileMutation>,
}

impl ToolResult {
    /// Successful result; object payloads are flattened, anything else
    /// lands under `output`
    pub fn ok(payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("output".to_string(), other);
                map
            }
        };
        Self {
            success: true,
            error: None,
            payload,
            mutation: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "tool failed without an error message".to_string();
        }
        Self {
            success: false,
            error: Some(error),
            payload: Map::new(),
            mutation: None,
        }
    }

    /// Attach extra fields (e.g. captured output of a failed command)
    pub fn with_payload(mut self, payload: Value) -> Self {
        if let Value::Object(map) = payload {
            self.payload.extend(map);
        }
        self
    }

    pub fn with_mutation(mut self, mutation: FileMutation) -> Self {
        self.mutation = Some(mutation);
        self
    }

    /// JSON form fed back to the model and to observers
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// Per-task context handed to every tool
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub task_id: String,
    pub project_id: String,
    pub user_id: String,
    pub workspace: Arc<Workspace>,
    /// Upper bound for shell-style tools
    pub command_timeout: Duration,
}

/// Capability every registered tool implements
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON Schema of the accepted input object
    fn input_schema(&self) -> Value;

    /// Check input before dispatch; the default validates against the schema
    fn validate(&self, input: &Value) -> Result<(), String> {
        validate_against_schema(&self.input_schema(), input)
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult;
}

/// Validate a JSON instance, joining every violation into one message
pub fn validate_against_schema(schema: &Value, input: &Value) -> Result<(), String> {
    let validator =
        jsonschema::validator_for(schema).map_err(|e| format!("invalid tool schema: {}", e))?;

    let errors: Vec<String> = validator.iter_errors(input).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// Ordered registry of named tool handlers
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the full catalogue the worker offers to the model
    pub fn with_default_tools() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CreateFileTool));
        registry.register(Arc::new(EditFileTool));
        registry.register(Arc::new(ReadFileTool));
        registry.register(Arc::new(ListFilesTool));
        registry.register(Arc::new(InstallDependenciesTool::default()));
        registry.register(Arc::new(RunCommandTool));
        registry.register(Arc::new(MarkCompleteTool));
        registry
    }

    /// Register a tool, replacing any existing tool of the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool schema catalogue sent to the provider, in registration order
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// Validate and dispatch one call; never panics or returns an error
    pub async fn execute(&self, name: &str, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(name) else {
            warn!(tool = name, "Model requested an unknown tool");
            TOOL_CALLS.with_label_values(&["unknown", "failure"]).inc();
            return ToolResult::failure(format!("Unknown tool: {}", name));
        };

        if let Err(e) = tool.validate(&input) {
            debug!(tool = name, error = %e, "Rejected tool input");
            TOOL_CALLS.with_label_values(&[name, "invalid"]).inc();
            return ToolResult::failure(format!("Invalid input for {}: {}", name, e));
        }

        let result = tool.execute(input, ctx).await;
        let status = if result.success { "success" } else { "failure" };
        TOOL_CALLS.with_label_values(&[name, status]).inc();
        result
    }
}

/// Read a string field that schema validation already guaranteed
pub(crate) fn str_field<'a>(input: &'a Value, key: &str) -> &'a str {
    input.get(key).and_then(Value::as_str).unwrap_or_default()
}
