use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use salescope_core::domain::intent::MessageType;
use salescope_core::domain::message::Message;
use salescope_core::flows::TurnState;

use crate::llm::{strip_code_fence, GenerationRequest, LlmClient, LlmError, ModelTier};
use crate::prompts::{PromptError, Prompts};

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("classifier backend failed: {0}")]
    Backend(#[from] LlmError),
    #[error("classifier returned a malformed response: {0}")]
    Malformed(String),
    #[error("classifier returned unknown label `{0}`")]
    InvalidLabel(String),
    #[error("turn state has no user message to classify")]
    MissingUserMessage,
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Output schema for the classification call: one required label drawn
/// from a closed enum.
pub fn classification_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "message_type": {
                "type": "string",
                "enum": MessageType::ALL.iter().map(MessageType::label).collect::<Vec<_>>(),
                "description": "Classify if the message requires a normal, analysis or forecasting response."
            }
        },
        "required": ["message_type"]
    })
}

/// Single bounded structured call that labels the latest user message.
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<Prompts>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<Prompts>) -> Self {
        Self { llm, prompts }
    }

    pub async fn classify(
        &self,
        state: &TurnState,
        reference_date: &str,
    ) -> Result<MessageType, ClassificationError> {
        let latest = state.latest_user_text().ok_or(ClassificationError::MissingUserMessage)?;

        let request = GenerationRequest::new(vec![Message::user(latest)])
            .with_system_prompt(self.prompts.classifier(reference_date)?)
            .with_response_schema(classification_schema())
            .on_tier(ModelTier::Classifier);

        let response = self.llm.generate(request).await?;
        let message_type = parse_label(&response.content.primary_text())?;

        info!(
            event_name = "agent.classifier.classified",
            message_type = %message_type,
            "message classified"
        );
        Ok(message_type)
    }
}

fn parse_label(raw: &str) -> Result<MessageType, ClassificationError> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(ClassificationError::Malformed("empty response".to_string()));
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|error| ClassificationError::Malformed(error.to_string()))?;
    let label = value
        .get("message_type")
        .and_then(Value::as_str)
        .ok_or_else(|| ClassificationError::Malformed("missing `message_type`".to_string()))?;

    MessageType::from_label(label).ok_or_else(|| ClassificationError::InvalidLabel(label.to_string()))
}
