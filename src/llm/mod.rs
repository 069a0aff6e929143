//! LLM provider abstraction
//!
//! The agent loop talks to a [`LlmProvider`], which opens one streamed turn
//! per call and yields provider-neutral [`StreamEvent`]s. The production
//! implementation is [`AnthropicClient`]; tests substitute a scripted
//! provider.

pub mod client;
pub mod stream;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use client::AnthropicClient;
pub use stream::{decode_sse, parse_sse_line, BlockKind, EventStream, StreamEvent};
pub use types::{ChatRequest, ContentBlock, Message, Role, ToolCall, ToolDefinition};

/// Errors from a provider call or its stream
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM provider is not configured (missing API key)")]
    NotConfigured,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("provider error ({kind}): {message}")]
    Api { kind: String, message: String },

    #[error("malformed stream: {0}")]
    Malformed(String),
}

/// A streaming chat provider
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn model(&self) -> &str;

    /// Whether credentials are present; reported by `/health`
    fn is_configured(&self) -> bool;

    /// Open one streamed assistant turn
    async fn stream(&self, request: ChatRequest) -> Result<EventStream, LlmError>;
}
