//! Agent Controller - bounded tool-calling loop for one task
//!
//! The AgentController streams each assistant turn from the provider,
//! dispatches the requested tools against the project workspace, and feeds
//! the batched results back until the model finishes or the iteration cap
//! is hit. Every step is published as a progress event.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::prompts::system_prompt;
use super::turn::{AssistantTurn, TurnAssembler};
use crate::llm::{BlockKind, ChatRequest, ContentBlock, LlmError, LlmProvider, Message, StreamEvent, ToolCall};
use crate::metrics::{LLM_CALL_DURATION, TASKS_TOTAL, TASK_ITERATIONS};
use crate::progress::{ProgressKind, ProgressPublisher};
use crate::task::{Task, TaskResult};
use crate::tools::{ToolContext, ToolRegistry, ToolResult, COMPLETE_TOOL};
use crate::workspace::{Workspace, WorkspaceError};

/// Configuration for the agent controller
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum number of iterations (LLM calls) before giving up
    pub max_iterations: usize,
    /// Overrides the per-agent-type system prompt when set
    pub system_prompt: Option<String>,
    /// Timeout for shell-style tools
    pub command_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            system_prompt: None,
            command_timeout: Duration::from_secs(120),
        }
    }
}

/// How a task run ended
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub iterations: usize,
    pub completed: bool,
    /// Summary passed to `mark_complete`, if the model called it
    pub summary: Option<String>,
    pub error: Option<String>,
}

impl AgentOutcome {
    pub fn into_result(self, task: &Task) -> TaskResult {
        TaskResult {
            task_id: task.task_id.clone(),
            agent_type: task.agent_type,
            iterations: self.iterations,
            completed: self.completed,
            error: self.error,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Metric label for this outcome
    pub fn label(&self) -> &'static str {
        if self.completed {
            "completed"
        } else if self.error.is_some() {
            "error"
        } else {
            "max_iterations"
        }
    }
}

/// Error type for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),
}

enum Finish {
    Completed { summary: Option<String> },
    CapReached,
}

/// Agent Controller orchestrating the provider and the tool registry
pub struct AgentController {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    workspace: Arc<Workspace>,
    publisher: ProgressPublisher,
    config: AgentConfig,
}

impl AgentController {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        workspace: Arc<Workspace>,
        publisher: ProgressPublisher,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            workspace,
            publisher,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run the loop for one task
    ///
    /// Never fails: provider and workspace errors end the task with a
    /// `task_error` event and an outcome whose `error` is set.
    pub async fn run(&self, task: &Task) -> AgentOutcome {
        self.run_tracked(task, &AtomicUsize::new(0)).await
    }

    /// [`run`](Self::run), publishing the iteration count to `iterations`
    /// as the loop advances
    pub async fn run_tracked(&self, task: &Task, iterations: &AtomicUsize) -> AgentOutcome {
        let root_span = info_span!(
            "task",
            task_id = %task.task_id,
            project_id = %task.project_id,
            agent_type = %task.agent_type,
            otel.name = "task"
        );

        async {
            info!(prompt_len = task.prompt.len(), "Starting task");
            self.publisher
                .task_event(
                    &task.task_id,
                    ProgressKind::TaskStarted {
                        task_id: task.task_id.clone(),
                        project_id: task.project_id.clone(),
                        agent_type: task.agent_type,
                        prompt: task.prompt.clone(),
                    },
                )
                .await;

            let finish = self.drive(task, iterations).await;
            let iterations = iterations.load(Ordering::Relaxed);
            let (outcome, event) = match finish {
                Ok(Finish::Completed { summary }) => {
                    info!(iterations, "Task completed");
                    (
                        AgentOutcome {
                            iterations,
                            completed: true,
                            summary: summary.clone(),
                            error: None,
                        },
                        ProgressKind::TaskCompleted {
                            iterations,
                            summary,
                        },
                    )
                }
                Ok(Finish::CapReached) => {
                    warn!(iterations, "Max iterations reached");
                    (
                        AgentOutcome {
                            iterations,
                            completed: false,
                            summary: None,
                            error: None,
                        },
                        ProgressKind::TaskWarning {
                            iterations,
                            message: format!(
                                "Reached the maximum of {} iterations without completing",
                                self.config.max_iterations
                            ),
                        },
                    )
                }
                Err(e) => {
                    error!(iterations, error = %e, "Task failed");
                    (
                        AgentOutcome {
                            iterations,
                            completed: false,
                            summary: None,
                            error: Some(e.to_string()),
                        },
                        ProgressKind::TaskError {
                            iterations,
                            error: e.to_string(),
                        },
                    )
                }
            };

            TASKS_TOTAL.with_label_values(&[outcome.label()]).inc();
            TASK_ITERATIONS.observe(iterations as f64);
            self.publisher.task_event(&task.task_id, event).await;
            outcome
        }
        .instrument(root_span)
        .await
    }

    async fn drive(&self, task: &Task, iterations: &AtomicUsize) -> Result<Finish, AgentError> {
        self.workspace.project_root(&task.project_id).await?;

        let ctx = ToolContext {
            task_id: task.task_id.clone(),
            project_id: task.project_id.clone(),
            user_id: task.user_id.clone(),
            workspace: self.workspace.clone(),
            command_timeout: self.config.command_timeout,
        };

        let system = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(|| system_prompt(task.agent_type).to_string());
        let definitions = self.tools.definitions();
        let mut messages = vec![Message::user_text(initial_prompt(task))];

        while iterations.load(Ordering::Relaxed) < self.config.max_iterations {
            let iteration = iterations.fetch_add(1, Ordering::Relaxed) + 1;

            self.publisher
                .task_event(
                    &task.task_id,
                    ProgressKind::IterationStart {
                        iteration,
                        max_iterations: self.config.max_iterations,
                    },
                )
                .await;

            let request = ChatRequest {
                system: system.clone(),
                messages: messages.clone(),
                tools: definitions.clone(),
            };

            let llm_span = info_span!(
                "llm_call",
                iteration,
                model = %self.provider.model(),
                otel.name = "llm_call"
            );
            let turn = self
                .stream_turn(&task.task_id, request)
                .instrument(llm_span)
                .await?;

            messages.push(Message::assistant(turn.blocks.clone()));

            if turn.tool_calls.is_empty() {
                debug!(iteration, "No tool calls, finishing");
                return Ok(Finish::Completed { summary: None });
            }

            let mut results = Vec::with_capacity(turn.tool_calls.len());
            let mut completion: Option<Option<String>> = None;

            for call in &turn.tool_calls {
                let result = self.dispatch(task, &ctx, call).await;

                if call.name == COMPLETE_TOOL && result.success {
                    let summary = result
                        .payload
                        .get("summary")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    completion = Some(summary);
                }

                results.push(ContentBlock::ToolResult {
                    tool_use_id: call.id.clone(),
                    content: result.to_value().to_string(),
                    is_error: !result.success,
                });
            }

            messages.push(Message::tool_results(results));

            if let Some(summary) = completion {
                return Ok(Finish::Completed { summary });
            }
        }

        Ok(Finish::CapReached)
    }

    /// Stream one turn, forwarding text and tool starts as they arrive
    async fn stream_turn(&self, task_id: &str, request: ChatRequest) -> Result<AssistantTurn, LlmError> {
        let call_start = Instant::now();
        let mut stream = self.provider.stream(request).await?;
        let mut assembler = TurnAssembler::new();

        while let Some(event) = stream.next().await {
            let event = event?;
            match &event {
                StreamEvent::TextDelta { text, .. } if !text.is_empty() => {
                    self.publisher
                        .task_event(task_id, ProgressKind::ThinkingChunk { content: text.clone() })
                        .await;
                }
                StreamEvent::BlockStart {
                    block: BlockKind::ToolUse { id, name },
                    ..
                } => {
                    self.publisher
                        .task_event(
                            task_id,
                            ProgressKind::ToolStart {
                                tool: name.clone(),
                                tool_use_id: id.clone(),
                            },
                        )
                        .await;
                }
                _ => {}
            }
            assembler.apply(event);
        }

        let elapsed = call_start.elapsed().as_secs_f64();
        LLM_CALL_DURATION
            .with_label_values(&[self.provider.model()])
            .observe(elapsed);

        let turn = assembler.finish()?;
        info!(
            duration_ms = elapsed * 1000.0,
            tool_calls = turn.tool_calls.len(),
            stop_reason = turn.stop_reason.as_deref().unwrap_or("none"),
            "LLM call completed"
        );
        Ok(turn)
    }

    /// Execute one tool call, publishing its progress and any file change
    async fn dispatch(&self, task: &Task, ctx: &ToolContext, call: &ToolCall) -> ToolResult {
        let shown_input = match &call.malformed_input {
            Some(raw) => Value::String(raw.clone()),
            None => call.input.clone(),
        };
        self.publisher
            .task_event(
                &task.task_id,
                ProgressKind::ToolExecuting {
                    tool: call.name.clone(),
                    tool_use_id: call.id.clone(),
                    input: shown_input,
                },
            )
            .await;

        let tool_span = info_span!(
            "tool_call",
            tool = %call.name,
            tool_use_id = %call.id,
            otel.name = "tool_call"
        );

        let result = match &call.malformed_input {
            Some(_) => {
                warn!(tool = %call.name, "Tool input was not valid JSON");
                ToolResult::failure(format!(
                    "Invalid input for {}: input was not valid JSON",
                    call.name
                ))
            }
            None => {
                self.tools
                    .execute(&call.name, call.input.clone(), ctx)
                    .instrument(tool_span)
                    .await
            }
        };

        if !result.success {
            debug!(tool = %call.name, error = ?result.error, "Tool call failed");
        }

        if let Some(mutation) = &result.mutation {
            self.publisher.file_mutation(&task.project_id, mutation).await;
        }

        self.publisher
            .task_event(
                &task.task_id,
                ProgressKind::ToolResult {
                    tool: call.name.clone(),
                    tool_use_id: call.id.clone(),
                    success: result.success,
                    result: result.to_value(),
                },
            )
            .await;

        result
    }
}

/// First user message: the prompt, plus the task context when present
fn initial_prompt(task: &Task) -> String {
    if task.context.is_empty() {
        return task.prompt.clone();
    }
    match serde_json::to_string_pretty(&task.context) {
        Ok(context) => format!("{}\n\nContext:\n{}", task.prompt, context),
        Err(_) => task.prompt.clone(),
    }
}
