//! Scripted doubles shared by the unit tests in this crate.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use salescope_core::domain::message::{ContentBlock, MessageContent};

use crate::llm::{GenerationRequest, GenerationResponse, LlmClient, LlmError, TokenUsage, ToolCall};
use crate::tools::{Tool, ToolAccess, ToolError};

/// Replays queued replies in order, then repeats `fallback` if set.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<GenerationResponse, LlmError>>>,
    fallback: Option<GenerationResponse>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Result<GenerationResponse, LlmError>>) -> Self {
        Self { replies: Mutex::new(replies.into()), ..Self::default() }
    }

    pub fn repeating(reply: GenerationResponse) -> Self {
        Self { fallback: Some(reply), ..Self::default() }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("lock").clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("lock").len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        self.requests.lock().expect("lock").push(request);
        if let Some(reply) = self.replies.lock().expect("lock").pop_front() {
            return reply;
        }
        self.fallback.clone().ok_or_else(|| LlmError::Parse("script exhausted".to_string()))
    }
}

/// A model turn that asks for one tool call.
pub fn tool_request(id: &str, name: &str, arguments: Value) -> GenerationResponse {
    GenerationResponse {
        content: MessageContent::Blocks(vec![ContentBlock::ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.clone(),
        }]),
        tool_calls: vec![ToolCall { id: id.to_string(), name: name.to_string(), arguments }],
        usage: TokenUsage::default(),
    }
}

pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &'static str {
        "run_query"
    }
    fn description(&self) -> &'static str {
        "Always fails"
    }
    fn parameters(&self) -> Value {
        json!({ "type": "object" })
    }
    fn access(&self) -> ToolAccess {
        ToolAccess::ReadOnly
    }
    async fn execute(&self, _input: Value) -> Result<Value, ToolError> {
        Err(ToolError::Execution("no such table: sales".to_string()))
    }
}

pub struct DeleteRowsTool;

#[async_trait]
impl Tool for DeleteRowsTool {
    fn name(&self) -> &'static str {
        "delete_rows"
    }
    fn description(&self) -> &'static str {
        "Delete rows from a table"
    }
    fn parameters(&self) -> Value {
        json!({ "type": "object" })
    }
    fn access(&self) -> ToolAccess {
        ToolAccess::Mutating
    }
    async fn execute(&self, _input: Value) -> Result<Value, ToolError> {
        Ok(json!({ "deleted": 24 }))
    }
}
