//! Conversational routing and agentic query runtime.
//!
//! A turn flows through the [`runtime::AgentRuntime`]:
//! 1. **Classification** (`classifier`) labels the latest user message as
//!    normal, analysis or forecasting with one structured backend call.
//! 2. **Routing** (`salescope_core::flows`) maps the label to a path; anything
//!    unrecognised goes to the analytical path.
//! 3. **Handling** (`handlers`) runs exactly one path:
//!    - normal: single-shot persona reply,
//!    - analytical: bounded reason/act/observe loop over read-only SQL tools
//!      (`sql_tools`, `guardrails`),
//!    - forecasting: structured extraction, sales history, forecast service.
//! 4. **Persistence** (`conversation`) appends both sides of the exchange to
//!    the session store.
//!
//! The reasoning backend is the [`llm::LlmClient`] trait; [`gemini::GeminiClient`]
//! is the production implementation and is built once and shared.

pub mod assembly;
pub mod classifier;
pub mod conversation;
pub mod forecast_client;
pub mod gemini;
pub mod guardrails;
pub mod handlers;
pub mod llm;
pub mod prompts;
pub mod runtime;
pub mod sql_tools;
pub mod tools;

#[cfg(test)]
mod testing;

pub use assembly::{assemble, AgentServices, AssemblyError};
pub use classifier::{ClassificationError, IntentClassifier};
pub use forecast_client::{ForecastError, ForecastProvider, HttpForecastProvider};
pub use gemini::GeminiClient;
pub use guardrails::{GuardrailDecision, QueryGuard};
pub use llm::{GenerationRequest, GenerationResponse, LlmClient, LlmError, ModelTier};
pub use runtime::{AgentRuntime, RuntimeParts, RuntimeSettings, TurnError, TurnReply, TurnRequest};
pub use sql_tools::SqlToolProvider;
pub use tools::{Tool, ToolAccess, ToolError, ToolRegistry};
