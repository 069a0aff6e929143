//! Reassembly of one streamed assistant turn
//!
//! Stream events arrive per content-block index. Text deltas are appended
//! to their block; tool input arrives as partial JSON and is only parsed
//! once the block closes.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::llm::{BlockKind, ContentBlock, LlmError, StreamEvent, ToolCall};

/// A finished assistant turn
#[derive(Debug, Clone, Default)]
pub struct AssistantTurn {
    /// Content blocks in index order, ready to append to the conversation
    pub blocks: Vec<ContentBlock>,
    /// Tool invocations in the order they were received
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<String>,
}

impl AssistantTurn {
    /// Concatenated text of every text block
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug)]
enum PendingBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        partial_json: String,
    },
}

#[derive(Debug, Default)]
pub struct TurnAssembler {
    blocks: BTreeMap<usize, PendingBlock>,
    stop_reason: Option<String>,
    finished: bool,
}

impl TurnAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::BlockStart { index, block } => {
                let pending = match block {
                    BlockKind::Text => PendingBlock::Text(String::new()),
                    BlockKind::ToolUse { id, name } => PendingBlock::ToolUse {
                        id,
                        name,
                        partial_json: String::new(),
                    },
                };
                self.blocks.insert(index, pending);
            }
            StreamEvent::TextDelta { index, text } => {
                match self.blocks.entry(index).or_insert_with(|| PendingBlock::Text(String::new())) {
                    PendingBlock::Text(buffer) => buffer.push_str(&text),
                    PendingBlock::ToolUse { .. } => {}
                }
            }
            StreamEvent::InputJsonDelta {
                index,
                partial_json: fragment,
            } => {
                if let Some(PendingBlock::ToolUse { partial_json, .. }) = self.blocks.get_mut(&index) {
                    partial_json.push_str(&fragment);
                }
            }
            StreamEvent::BlockStop { .. } => {}
            StreamEvent::MessageDelta { stop_reason } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
            }
            StreamEvent::MessageStop => self.finished = true,
        }
    }

    /// Finalize the turn; a stream that never reached `message_stop` is an error
    pub fn finish(self) -> Result<AssistantTurn, LlmError> {
        if !self.finished {
            return Err(LlmError::Malformed(
                "stream ended before message_stop".to_string(),
            ));
        }

        let mut turn = AssistantTurn {
            stop_reason: self.stop_reason,
            ..Default::default()
        };

        for pending in self.blocks.into_values() {
            match pending {
                PendingBlock::Text(text) => {
                    if !text.is_empty() {
                        turn.blocks.push(ContentBlock::Text { text });
                    }
                }
                PendingBlock::ToolUse {
                    id,
                    name,
                    partial_json,
                } => {
                    let (input, malformed_input) = parse_tool_input(&partial_json);
                    turn.blocks.push(ContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    });
                    turn.tool_calls.push(ToolCall {
                        id,
                        name,
                        input,
                        malformed_input,
                    });
                }
            }
        }

        Ok(turn)
    }
}

/// Empty input means `{}`; unparsable input is kept raw alongside `{}`
fn parse_tool_input(raw: &str) -> (Value, Option<String>) {
    if raw.trim().is_empty() {
        return (Value::Object(Map::new()), None);
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => (value, None),
        Err(_) => (Value::Object(Map::new()), Some(raw.to_string())),
    }
}
