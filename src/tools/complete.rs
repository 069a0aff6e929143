//! Terminal tool the model calls when the task is done

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{str_field, Tool, ToolContext, ToolResult};

pub const COMPLETE_TOOL: &str = "mark_complete";

pub struct MarkCompleteTool;

#[async_trait]
impl Tool for MarkCompleteTool {
    fn name(&self) -> &'static str {
        COMPLETE_TOOL
    }

    fn description(&self) -> &'static str {
        "Call this once the requested work is finished. Provide a short summary of what was built or changed."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string", "description": "What was accomplished"}
            },
            "required": ["summary"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult::ok(json!({"summary": str_field(&input, "summary")}))
    }
}
