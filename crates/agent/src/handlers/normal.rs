use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use salescope_core::domain::intent::Route;
use salescope_core::domain::message::Message;

use crate::handlers::{HandlerContext, HandlerOutcome, PathHandler};
use crate::llm::{GenerationRequest, LlmClient};
use crate::prompts::Prompts;

/// Persona-driven single-shot reply with no tools and no database access.
pub struct NormalHandler {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<Prompts>,
}

impl NormalHandler {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<Prompts>) -> Self {
        Self { llm, prompts }
    }
}

#[async_trait]
impl PathHandler for NormalHandler {
    fn route(&self) -> Route {
        Route::Normal
    }

    async fn handle(&self, context: HandlerContext<'_>) -> HandlerOutcome {
        let system_prompt = match self.prompts.normal(context.reference_date, context.history) {
            Ok(prompt) => prompt,
            Err(error) => return HandlerOutcome::Failed { reason: error.to_string() },
        };

        let request = GenerationRequest::new(vec![Message::user(context.latest_user_text())])
            .with_system_prompt(system_prompt);

        let response = tokio::select! {
            biased;
            _ = context.cancel.cancelled() => return HandlerOutcome::Cancelled,
            response = self.llm.generate(request) => response,
        };

        match response {
            Ok(response) => {
                debug!(
                    event_name = "agent.normal.answered",
                    correlation_id = context.correlation_id,
                    output_tokens = response.usage.output_tokens,
                    "normal reply generated"
                );
                HandlerOutcome::answered(response.content)
            }
            Err(error) => HandlerOutcome::Failed { reason: error.to_string() },
        }
    }
}
