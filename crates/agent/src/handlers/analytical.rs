use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use salescope_core::domain::intent::Route;
use salescope_core::domain::message::{ContentBlock, Message, MessageContent, Role};
use salescope_core::flows::{transition_agent, AgentEvent, AgentPhase, FlowTransitionError, StepBudget};

use crate::handlers::{HandlerContext, HandlerOutcome, PathHandler};
use crate::llm::{GenerationRequest, GenerationResponse, LlmClient};
use crate::prompts::Prompts;
use crate::tools::ToolRegistry;

/// Autonomous reason/act/observe loop over the read-only SQL tools.
pub struct AnalyticalHandler {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<Prompts>,
    tools: ToolRegistry,
    step_ceiling: u32,
    default_row_limit: u32,
}

impl AnalyticalHandler {
    /// Only the read-only subset of `tools` is ever offered to the model.
    pub fn new(
        llm: Arc<dyn LlmClient>,
        prompts: Arc<Prompts>,
        tools: &ToolRegistry,
        step_ceiling: u32,
        default_row_limit: u32,
    ) -> Self {
        Self { llm, prompts, tools: tools.read_only(), step_ceiling, default_row_limit }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    async fn run(&self, context: HandlerContext<'_>) -> Result<HandlerOutcome, FlowTransitionError> {
        let system_prompt = match self.prompts.analytical(
            context.reference_date,
            self.default_row_limit,
            context.history,
        ) {
            Ok(prompt) => prompt,
            Err(error) => return Ok(HandlerOutcome::Failed { reason: error.to_string() }),
        };

        let definitions = self.tools.definitions();
        let mut conversation = vec![Message::user(context.latest_user_text())];
        let mut budget = StepBudget::new(self.step_ceiling);
        let mut phase = AgentPhase::Reason;
        let mut tool_calls = 0_u32;

        loop {
            let Ok(step) = budget.consume() else {
                warn!(
                    event_name = "agent.analytical.ceiling_reached",
                    correlation_id = context.correlation_id,
                    ceiling = budget.ceiling(),
                    tool_calls,
                    "analytical loop hit its step ceiling"
                );
                return Ok(HandlerOutcome::StepCeilingReached { steps: budget.used() });
            };

            let request = GenerationRequest::new(conversation.clone())
                .with_system_prompt(system_prompt.clone())
                .with_tools(definitions.clone());

            let response = tokio::select! {
                biased;
                _ = context.cancel.cancelled() => return Ok(HandlerOutcome::Cancelled),
                response = self.llm.generate(request) => response,
            };
            let response = match response {
                Ok(response) => response,
                Err(error) => return Ok(HandlerOutcome::Failed { reason: error.to_string() }),
            };

            debug!(
                event_name = "agent.analytical.step",
                correlation_id = context.correlation_id,
                step,
                requested_tools = response.tool_calls.len(),
                "analytical reasoning step"
            );

            if response.tool_calls.is_empty() {
                transition_agent(phase, AgentEvent::FinalAnswer)?;
                info!(
                    event_name = "agent.analytical.answered",
                    correlation_id = context.correlation_id,
                    steps = step,
                    tool_calls,
                    "analytical answer produced"
                );
                return Ok(HandlerOutcome::Answered { content: response.content, tool_calls });
            }

            phase = transition_agent(phase, AgentEvent::ToolRequested)?.to;
            conversation.push(Message::new(Role::Assistant, request_content(&response)));

            let mut observations = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                let result = tokio::select! {
                    biased;
                    _ = context.cancel.cancelled() => return Ok(HandlerOutcome::Cancelled),
                    result = self.tools.execute(&call.name, call.arguments.clone()) => result,
                };
                tool_calls += 1;

                let output = result.unwrap_or_else(|error| {
                    debug!(
                        event_name = "agent.analytical.tool_failed",
                        correlation_id = context.correlation_id,
                        tool = %call.name,
                        error = %error,
                        "tool call failed, returning error as observation"
                    );
                    json!({ "error": error.to_string() })
                });
                observations.push(ContentBlock::ToolResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    output,
                });
            }
            phase = transition_agent(phase, AgentEvent::ToolExecuted)?.to;

            conversation.push(Message::new(Role::Tool, MessageContent::Blocks(observations)));
            phase = transition_agent(phase, AgentEvent::ObservationRecorded)?.to;
        }
    }
}

/// The assistant turn as it must be replayed to the model: its text plus one
/// tool-call block per requested call.
fn request_content(response: &GenerationResponse) -> MessageContent {
    if !response.content.tool_calls().is_empty() {
        return response.content.clone();
    }

    let mut blocks = Vec::with_capacity(response.tool_calls.len() + 1);
    let text = response.content.primary_text();
    if !text.trim().is_empty() {
        blocks.push(ContentBlock::Text { text });
    }
    blocks.extend(response.tool_calls.iter().map(|call| ContentBlock::ToolCall {
        id: call.id.clone(),
        name: call.name.clone(),
        arguments: call.arguments.clone(),
    }));
    MessageContent::Blocks(blocks)
}

#[async_trait]
impl PathHandler for AnalyticalHandler {
    fn route(&self) -> Route {
        Route::Analytical
    }

    async fn handle(&self, context: HandlerContext<'_>) -> HandlerOutcome {
        self.run(context)
            .await
            .unwrap_or_else(|error| HandlerOutcome::Failed { reason: error.to_string() })
    }
}
