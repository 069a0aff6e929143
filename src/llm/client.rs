//! Anthropic Messages API client with streaming

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::stream::{decode_sse, EventStream};
use super::{ChatRequest, LlmError, LlmProvider};
use crate::config::LlmSettings;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Streaming client for `/v1/messages`
#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 8192,
        }
    }

    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self::new(settings.api_key.clone(), settings.model.clone())
            .with_base_url(settings.base_url.clone())
            .with_max_tokens(settings.max_tokens)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": request.system,
            "messages": request.messages,
            "stream": true,
        });
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
        }
        body
    }
}

#[async_trait]
impl LlmProvider for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn stream(&self, request: ChatRequest) -> Result<EventStream, LlmError> {
        if !self.is_configured() {
            return Err(LlmError::NotConfigured);
        }

        let endpoint = format!("{}/v1/messages", self.base_url);
        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Opening provider stream"
        );

        let response = self
            .http
            .post(&endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(decode_sse(response.bytes_stream()))
    }
}
