//! Task and result records exchanged with producers
//!
//! Both travel as camelCase JSON: tasks on `queue:<agentType>`, results at
//! `result:<taskId>`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which kind of agent a task is routed to
///
/// Selects both the queue a worker listens on and the system prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    /// General application building (the default)
    #[default]
    Code,
    /// UI and styling work
    Design,
    /// Diagnosing and fixing a broken project
    Debug,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Code => "code",
            AgentType::Design => "design",
            AgentType::Debug => "debug",
        }
    }

    pub fn all() -> [AgentType; 3] {
        [AgentType::Code, AgentType::Design, AgentType::Debug]
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentType::all()
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown agent type '{}' (expected code, design or debug)", s))
    }
}

/// One unit of work, immutable once enqueued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub project_id: String,
    pub user_id: String,
    pub prompt: String,
    #[serde(default)]
    pub agent_type: AgentType,
    /// Opaque producer-supplied context, forwarded to the model verbatim
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a task with a fresh time-sortable id
    pub fn new(
        project_id: impl Into<String>,
        user_id: impl Into<String>,
        prompt: impl Into<String>,
        agent_type: AgentType,
    ) -> Self {
        Self {
            task_id: uuid::Uuid::now_v7().to_string(),
            project_id: project_id.into(),
            user_id: user_id.into(),
            prompt: prompt.into(),
            agent_type,
            context: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }
}

/// Terminal record written once per task, kept for a bounded TTL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub agent_type: AgentType,
    pub iterations: usize,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}
