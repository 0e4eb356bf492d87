//! Gemini `generateContent` client.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use salescope_core::config::LlmConfig;
use salescope_core::domain::message::{ContentBlock, Message, MessageContent, Role};

use crate::llm::{
    GenerationRequest, GenerationResponse, LlmClient, LlmError, ModelTier, TokenUsage, ToolCall,
};

const RETRY_BASE_MS: u64 = 250;

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    classifier_model: String,
    temperature: f32,
    max_retries: u32,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("classifier_model", &self.classifier_model)
            .finish()
    }
}

impl GeminiClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| LlmError::Configuration(error.to_string()))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            classifier_model: config.classifier_model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Primary => &self.model,
            ModelTier::Classifier => &self.classifier_model,
        }
    }

    pub(crate) fn api_url(&self, tier: ModelTier) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model_for(tier))
    }

    async fn send_once(&self, url: &str, body: &Value) -> Result<GenerationResponse, LlmError> {
        let response = self
            .http
            .post(url)
            .header("content-type", "application/json")
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Network(error.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status: status.as_u16(), message });
        }

        let json: Value =
            response.json().await.map_err(|error| LlmError::Parse(error.to_string()))?;
        parse_response(&json)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let body = build_request_body(&request, self.temperature);
        let url = self.api_url(request.tier);
        let mut attempt = 0;

        loop {
            debug!(
                event_name = "agent.llm.request",
                model = %self.model_for(request.tier),
                attempt,
                tools = request.tools.len(),
                structured = request.response_schema.is_some(),
                "gemini request"
            );

            match self.send_once(&url, &body).await {
                Ok(response) => return Ok(response),
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    let backoff = retry_backoff(attempt);
                    warn!(
                        event_name = "agent.llm.retry",
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "retrying gemini request"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Exponential backoff starting at 250ms, saturating instead of overflowing.
fn retry_backoff(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(RETRY_BASE_MS.saturating_mul(factor))
}

pub(crate) fn build_request_body(request: &GenerationRequest, temperature: f32) -> Value {
    let contents = request.messages.iter().filter_map(message_to_content).collect::<Vec<_>>();

    let mut generation_config = Map::new();
    generation_config.insert("temperature".to_string(), json!(temperature));
    if let Some(schema) = &request.response_schema {
        generation_config.insert("responseMimeType".to_string(), json!("application/json"));
        generation_config.insert("responseSchema".to_string(), schema.clone());
    }

    let mut body = json!({
        "contents": contents,
        "generationConfig": Value::Object(generation_config),
    });

    let system_text = request.system_prompt.clone().or_else(|| {
        request.messages.iter().find(|message| message.role == Role::System).map(Message::text)
    });
    if let Some(text) = system_text {
        body["systemInstruction"] = json!({ "parts": [{ "text": text }] });
    }

    if !request.tools.is_empty() {
        let declarations = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                })
            })
            .collect::<Vec<_>>();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
    }

    body
}

fn message_to_content(message: &Message) -> Option<Value> {
    let role = match message.role {
        Role::User | Role::Tool => "user",
        Role::Assistant => "model",
        Role::System => return None,
    };

    let parts = match &message.content {
        MessageContent::Text(text) => vec![json!({ "text": text })],
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => json!({ "text": text }),
                ContentBlock::ToolCall { name, arguments, .. } => {
                    json!({ "functionCall": { "name": name, "args": arguments } })
                }
                ContentBlock::ToolResult { name, output, .. } => {
                    json!({ "functionResponse": { "name": name, "response": { "content": output } } })
                }
            })
            .collect(),
    };

    Some(json!({ "role": role, "parts": parts }))
}

pub(crate) fn parse_response(json: &Value) -> Result<GenerationResponse, LlmError> {
    let candidates = json["candidates"]
        .as_array()
        .ok_or_else(|| LlmError::Parse("no candidates in response".to_string()))?;
    let first =
        candidates.first().ok_or_else(|| LlmError::Parse("empty candidates".to_string()))?;
    let parts = first["content"]["parts"].as_array().cloned().unwrap_or_default();

    let mut blocks = Vec::new();
    let mut tool_calls = Vec::new();
    for part in &parts {
        if let Some(text) = part["text"].as_str() {
            blocks.push(ContentBlock::Text { text: text.to_string() });
        }
        if let Some(call) = part.get("functionCall") {
            let name = call["name"]
                .as_str()
                .ok_or_else(|| LlmError::Parse("functionCall without name".to_string()))?;
            let id = uuid::Uuid::new_v4().to_string();
            let arguments = call.get("args").cloned().unwrap_or_else(|| json!({}));
            blocks.push(ContentBlock::ToolCall {
                id: id.clone(),
                name: name.to_string(),
                arguments: arguments.clone(),
            });
            tool_calls.push(ToolCall { id, name: name.to_string(), arguments });
        }
    }

    let content = match blocks.as_slice() {
        [ContentBlock::Text { text }] => MessageContent::Text(text.clone()),
        _ => MessageContent::Blocks(blocks),
    };

    let usage = TokenUsage {
        input_tokens: json["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0),
        output_tokens: json["usageMetadata"]["candidatesTokenCount"].as_u64().unwrap_or(0),
    };

    Ok(GenerationResponse { content, tool_calls, usage })
}
