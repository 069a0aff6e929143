//! Progress events and the best-effort publisher
//!
//! Observers of a task subscribe to `progress:<taskId>`; live-preview
//! consumers of a project subscribe to `files:<projectId>`. Publishing never
//! fails a task: errors are logged, counted, and dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::broker::{files_channel, progress_channel, Broker};
use crate::metrics::PUBLISH_FAILURES;
use crate::task::AgentType;

/// One timestamped step of task execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(flatten)]
    pub kind: ProgressKind,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn now(kind: ProgressKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ProgressKind {
    TaskStarted {
        task_id: String,
        project_id: String,
        agent_type: AgentType,
        prompt: String,
    },
    IterationStart {
        iteration: usize,
        max_iterations: usize,
    },
    /// Streamed text from the model, before its block is finalized
    ThinkingChunk {
        content: String,
    },
    /// The model opened a tool invocation block
    ToolStart {
        tool: String,
        tool_use_id: String,
    },
    ToolExecuting {
        tool: String,
        tool_use_id: String,
        input: Value,
    },
    ToolResult {
        tool: String,
        tool_use_id: String,
        success: bool,
        result: Value,
    },
    TaskCompleted {
        iterations: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    TaskWarning {
        iterations: usize,
        message: String,
    },
    TaskError {
        iterations: usize,
        error: String,
    },
}

impl ProgressKind {
    /// Wire name of the event type
    pub fn name(&self) -> &'static str {
        match self {
            ProgressKind::TaskStarted { .. } => "task_started",
            ProgressKind::IterationStart { .. } => "iteration_start",
            ProgressKind::ThinkingChunk { .. } => "thinking_chunk",
            ProgressKind::ToolStart { .. } => "tool_start",
            ProgressKind::ToolExecuting { .. } => "tool_executing",
            ProgressKind::ToolResult { .. } => "tool_result",
            ProgressKind::TaskCompleted { .. } => "task_completed",
            ProgressKind::TaskWarning { .. } => "task_warning",
            ProgressKind::TaskError { .. } => "task_error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressKind::TaskCompleted { .. }
                | ProgressKind::TaskWarning { .. }
                | ProgressKind::TaskError { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Create,
    Edit,
}

/// Raw file change broadcast to live-preview consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMutation {
    pub action: FileAction,
    pub path: String,
    pub content: String,
}

impl FileMutation {
    pub fn create(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            action: FileAction::Create,
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn edit(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            action: FileAction::Edit,
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Fire-and-forget publisher for progress and file channels
#[derive(Clone)]
pub struct ProgressPublisher {
    broker: Arc<dyn Broker>,
}

impl ProgressPublisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Stamp and publish a progress event on `progress:<taskId>`
    pub async fn task_event(&self, task_id: &str, kind: ProgressKind) {
        let event = ProgressEvent::now(kind);
        self.publish(&progress_channel(task_id), &event, "progress")
            .await;
    }

    /// Publish a file change on `files:<projectId>`
    pub async fn file_mutation(&self, project_id: &str, mutation: &FileMutation) {
        self.publish(&files_channel(project_id), mutation, "files")
            .await;
    }

    async fn publish<T: Serialize>(&self, channel: &str, payload: &T, label: &str) {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                warn!(channel, error = %e, "Failed to serialize published payload");
                PUBLISH_FAILURES.with_label_values(&[label]).inc();
                return;
            }
        };

        if let Err(e) = self.broker.publish(channel, &json).await {
            warn!(channel, error = %e, "Publish failed, continuing task");
            PUBLISH_FAILURES.with_label_values(&[label]).inc();
        }
    }
}
