//! Shared fixtures: a scripted LLM provider and an in-memory harness

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::broadcast;

use taskforge::agent::{AgentConfig, AgentController};
use taskforge::broker::InMemoryBroker;
use taskforge::llm::{BlockKind, ChatRequest, EventStream, LlmError, LlmProvider, StreamEvent};
use taskforge::progress::{FileMutation, ProgressEvent, ProgressPublisher};
use taskforge::tools::ToolRegistry;
use taskforge::workspace::Workspace;

/// Builds the event sequence of one assistant turn
#[derive(Default)]
pub struct TurnScript {
    events: Vec<StreamEvent>,
    next_index: usize,
    has_tools: bool,
}

impl TurnScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A text block streamed as the given chunks
    pub fn text(mut self, chunks: &[&str]) -> Self {
        let index = self.next_index;
        self.next_index += 1;
        self.events.push(StreamEvent::BlockStart {
            index,
            block: BlockKind::Text,
        });
        for chunk in chunks {
            self.events.push(StreamEvent::TextDelta {
                index,
                text: chunk.to_string(),
            });
        }
        self.events.push(StreamEvent::BlockStop { index });
        self
    }

    /// A tool call whose JSON input arrives in two fragments
    pub fn tool(self, id: &str, name: &str, input: Value) -> Self {
        let raw = input.to_string();
        self.raw_tool(id, name, &raw)
    }

    /// A tool call with arbitrary (possibly invalid) input text
    pub fn raw_tool(mut self, id: &str, name: &str, raw: &str) -> Self {
        let index = self.next_index;
        self.next_index += 1;
        self.has_tools = true;
        self.events.push(StreamEvent::BlockStart {
            index,
            block: BlockKind::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
            },
        });
        let mut split = raw.len() / 2;
        while !raw.is_char_boundary(split) {
            split -= 1;
        }
        for fragment in [&raw[..split], &raw[split..]] {
            if !fragment.is_empty() {
                self.events.push(StreamEvent::InputJsonDelta {
                    index,
                    partial_json: fragment.to_string(),
                });
            }
        }
        self.events.push(StreamEvent::BlockStop { index });
        self
    }

    /// Finish the turn with `message_delta` + `message_stop`
    pub fn build(mut self) -> Vec<StreamEvent> {
        let stop_reason = if self.has_tools { "tool_use" } else { "end_turn" };
        self.events.push(StreamEvent::MessageDelta {
            stop_reason: Some(stop_reason.to_string()),
        });
        self.events.push(StreamEvent::MessageStop);
        self.events
    }

    /// The events without the closing `message_stop`
    pub fn truncated(self) -> Vec<StreamEvent> {
        self.events
    }
}

enum Scripted {
    Items(Vec<Result<StreamEvent, LlmError>>),
    OpenFailure(LlmError),
}

/// In-process provider replaying scripted turns and recording requests
#[derive(Default)]
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Scripted>>,
    repeat: Option<Vec<StreamEvent>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            turns: Mutex::new(
                turns
                    .into_iter()
                    .map(|events| Scripted::Items(events.into_iter().map(Ok).collect()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    /// Serve the same turn on every call
    pub fn repeating(turn: Vec<StreamEvent>) -> Self {
        Self {
            repeat: Some(turn),
            ..Default::default()
        }
    }

    /// Fail the next call before any event is streamed
    pub fn then_open_failure(self, error: LlmError) -> Self {
        self.turns
            .lock()
            .unwrap()
            .push_back(Scripted::OpenFailure(error));
        self
    }

    /// Stream `events`, then fail with `error`
    pub fn then_stream_failure(self, events: Vec<StreamEvent>, error: LlmError) -> Self {
        let mut items: Vec<Result<StreamEvent, LlmError>> = events.into_iter().map(Ok).collect();
        items.push(Err(error));
        self.turns.lock().unwrap().push_back(Scripted::Items(items));
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn stream(&self, request: ChatRequest) -> Result<EventStream, LlmError> {
        self.requests.lock().unwrap().push(request);

        let next = self.turns.lock().unwrap().pop_front();
        let items = match next {
            Some(Scripted::Items(items)) => items,
            Some(Scripted::OpenFailure(error)) => return Err(error),
            None => match &self.repeat {
                Some(turn) => turn.iter().cloned().map(Ok).collect(),
                None => return Err(LlmError::Malformed("script exhausted".to_string())),
            },
        };

        Ok(Box::pin(futures_util::stream::iter(items)))
    }
}

/// Controller wired to the in-memory broker and a temporary workspace
pub struct Harness {
    pub broker: Arc<InMemoryBroker>,
    pub provider: Arc<ScriptedProvider>,
    pub workspace: Arc<Workspace>,
    pub controller: Arc<AgentController>,
    pub publisher: ProgressPublisher,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(provider: ScriptedProvider, max_iterations: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(InMemoryBroker::new());
        let provider = Arc::new(provider);
        let workspace = Arc::new(Workspace::new(dir.path()));
        let publisher = ProgressPublisher::new(broker.clone());

        let controller = Arc::new(AgentController::new(
            provider.clone(),
            Arc::new(ToolRegistry::with_default_tools()),
            workspace.clone(),
            publisher.clone(),
            AgentConfig {
                max_iterations,
                system_prompt: None,
                command_timeout: Duration::from_secs(10),
            },
        ));

        Self {
            broker,
            provider,
            workspace,
            controller,
            publisher,
            dir,
        }
    }

    pub async fn progress(&self, task_id: &str) -> broadcast::Receiver<String> {
        self.broker.subscribe(&format!("progress:{}", task_id)).await
    }

    pub async fn files(&self, project_id: &str) -> broadcast::Receiver<String> {
        self.broker.subscribe(&format!("files:{}", project_id)).await
    }
}

/// Everything already published on a progress channel
pub fn drain_events(rx: &mut broadcast::Receiver<String>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(raw) = rx.try_recv() {
        events.push(serde_json::from_str(&raw).unwrap());
    }
    events
}

pub fn drain_mutations(rx: &mut broadcast::Receiver<String>) -> Vec<FileMutation> {
    let mut mutations = Vec::new();
    while let Ok(raw) = rx.try_recv() {
        mutations.push(serde_json::from_str(&raw).unwrap());
    }
    mutations
}

pub fn event_names(events: &[ProgressEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind.name()).collect()
}
