//! Server-sent event decoding for streamed Messages responses
//!
//! The provider sends lines like:
//!
//! ```text
//! event: content_block_delta
//! data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}
//! ```
//!
//! Only `data:` lines carry information; each one is decoded into zero or
//! more provider-neutral [`StreamEvent`]s.

use std::pin::Pin;

use async_stream::stream;
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;

use super::LlmError;

/// Provider-neutral piece of a streamed assistant turn
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    BlockStart { index: usize, block: BlockKind },
    TextDelta { index: usize, text: String },
    InputJsonDelta { index: usize, partial_json: String },
    BlockStop { index: usize },
    MessageDelta { stop_reason: Option<String> },
    MessageStop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    Text,
    ToolUse { id: String, name: String },
}

/// Stream of decoded events for one turn
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiEvent {
    MessageStart,
    ContentBlockStart {
        index: usize,
        content_block: ApiBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: ApiDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: ApiMessageDelta,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    kind: String,
    message: String,
}

/// Decode one SSE line; non-data lines decode to nothing
pub fn parse_sse_line(line: &str) -> Result<Vec<StreamEvent>, LlmError> {
    let trimmed = line.trim();
    let Some(data) = trimmed.strip_prefix("data:") else {
        return Ok(vec![]);
    };
    let data = data.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return Ok(vec![]);
    }

    let event: ApiEvent = serde_json::from_str(data)
        .map_err(|e| LlmError::Malformed(format!("{} in {}", e, data)))?;

    let events = match event {
        ApiEvent::ContentBlockStart {
            index,
            content_block,
        } => match content_block {
            ApiBlock::Text { text } => {
                let mut events = vec![StreamEvent::BlockStart {
                    index,
                    block: BlockKind::Text,
                }];
                if !text.is_empty() {
                    events.push(StreamEvent::TextDelta { index, text });
                }
                events
            }
            ApiBlock::ToolUse { id, name } => vec![StreamEvent::BlockStart {
                index,
                block: BlockKind::ToolUse { id, name },
            }],
            ApiBlock::Other => vec![],
        },
        ApiEvent::ContentBlockDelta { index, delta } => match delta {
            ApiDelta::TextDelta { text } => vec![StreamEvent::TextDelta { index, text }],
            ApiDelta::InputJsonDelta { partial_json } => {
                vec![StreamEvent::InputJsonDelta {
                    index,
                    partial_json,
                }]
            }
            ApiDelta::Other => vec![],
        },
        ApiEvent::ContentBlockStop { index } => vec![StreamEvent::BlockStop { index }],
        ApiEvent::MessageDelta { delta } => vec![StreamEvent::MessageDelta {
            stop_reason: delta.stop_reason,
        }],
        ApiEvent::MessageStop => vec![StreamEvent::MessageStop],
        ApiEvent::Error { error } => {
            return Err(LlmError::Api {
                kind: error.kind,
                message: error.message,
            })
        }
        ApiEvent::MessageStart | ApiEvent::Ping | ApiEvent::Unknown => vec![],
    };

    Ok(events)
}

/// Turn a raw byte stream into decoded events
///
/// Bytes are buffered until a full line is available so multi-byte
/// characters split across network chunks survive intact.
pub fn decode_sse<S, B, E>(bytes: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<LlmError> + Send + 'static,
{
    Box::pin(stream! {
        let mut buffer: Vec<u8> = Vec::new();
        let mut bytes = Box::pin(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err::<StreamEvent, LlmError>(e.into());
                    return;
                }
            };
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                match parse_sse_line(&String::from_utf8_lossy(&line)) {
                    Ok(events) => {
                        for event in events {
                            yield Ok(event);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        if !buffer.is_empty() {
            match parse_sse_line(&String::from_utf8_lossy(&buffer)) {
                Ok(events) => {
                    for event in events {
                        yield Ok(event);
                    }
                }
                Err(e) => yield Err(e),
            }
        }
    })
}
