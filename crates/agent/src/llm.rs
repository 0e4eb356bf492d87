use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use salescope_core::domain::message::{Message, MessageContent};

/// Which configured model a request should run on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ModelTier {
    #[default]
    Primary,
    Classifier,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One call to the reasoning backend. The system prompt travels with the
/// request so a single long-lived client serves every handler.
#[derive(Clone, Debug, Default)]
pub struct GenerationRequest {
    pub tier: ModelTier,
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub response_schema: Option<Value>,
}

impl GenerationRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages, ..Self::default() }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_response_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn on_tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenerationResponse {
    pub content: MessageContent,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

impl GenerationResponse {
    pub fn text(content: impl Into<MessageContent>) -> Self {
        Self { content: content.into(), tool_calls: Vec::new(), usage: TokenUsage::default() }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("backend returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("backend rate limited the request")]
    RateLimited,
    #[error("network error: {0}")]
    Network(String),
    #[error("could not parse backend response: {0}")]
    Parse(String),
    #[error("backend request timed out")]
    Timeout,
    #[error("backend client misconfigured: {0}")]
    Configuration(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited | Self::Network(_) | Self::Timeout => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Parse(_) | Self::Configuration(_) => false,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Unwraps a structured reply that arrived inside a Markdown code fence.
pub(crate) fn strip_code_fence(raw: &str) -> &str {
    let raw = raw.trim();
    let Some(inner) = raw.strip_prefix("```") else {
        return raw;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
