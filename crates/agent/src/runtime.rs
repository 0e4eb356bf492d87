use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use salescope_core::clock::{reference_date, Clock, SystemClock};
use salescope_core::config::AppConfig;
use salescope_core::domain::intent::Route;
use salescope_core::domain::message::{Message, MessageContent};
use salescope_core::domain::session::SessionId;
use salescope_core::errors::{ApplicationError, DomainError};
use salescope_core::flows::{FlowTransitionError, TurnFlow, TurnState};
use salescope_db::{RepositoryError, SalesRepository, SessionStore};

use crate::classifier::{ClassificationError, IntentClassifier};
use crate::conversation::{validate_message, ConversationLog};
use crate::forecast_client::ForecastProvider;
use crate::handlers::{
    AnalyticalHandler, ForecastingHandler, HandlerContext, HandlerOutcome, NormalHandler,
    PathHandler,
};
use crate::llm::LlmClient;
use crate::prompts::{PromptError, Prompts};
use crate::tools::ToolRegistry;

const EMPTY_ANSWER_FALLBACK: &str =
    "I wasn't able to put together an answer for that. Could you rephrase the question?";

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    InvalidMessage(#[from] DomainError),
    #[error(transparent)]
    Classification(#[from] ClassificationError),
    #[error("session store failure: {0}")]
    Persistence(#[from] RepositoryError),
    #[error("turn was cancelled")]
    Cancelled,
    #[error("turn timed out after {0}s")]
    TimedOut(u64),
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
}

impl From<TurnError> for ApplicationError {
    fn from(value: TurnError) -> Self {
        match value {
            TurnError::InvalidMessage(error) => Self::Domain(error),
            TurnError::Classification(error) => Self::Classification(error.to_string()),
            TurnError::Persistence(error) => Self::Persistence(error.to_string()),
            TurnError::Cancelled => Self::Cancelled,
            TurnError::TimedOut(seconds) => Self::TimedOut(seconds),
            TurnError::Flow(error) => Self::Domain(DomainError::FlowTransition(error)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeSettings {
    pub include_history: bool,
    pub history_window: usize,
    pub turn_timeout: Duration,
    pub reference_date: Option<String>,
    pub max_message_chars: usize,
    pub step_ceiling: u32,
    pub default_row_limit: u32,
    pub default_horizon: u32,
    pub quantile_levels: Vec<f64>,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            include_history: config.agent.include_history,
            history_window: config.agent.history_window,
            turn_timeout: Duration::from_secs(config.agent.turn_timeout_secs),
            reference_date: config.agent.reference_date.clone(),
            max_message_chars: config.agent.max_message_chars,
            step_ceiling: config.agent.step_ceiling,
            default_row_limit: config.agent.default_row_limit,
            default_horizon: config.forecast.default_horizon,
            quantile_levels: config.forecast.quantiles.clone(),
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Long-lived collaborators the runtime is assembled from.
pub struct RuntimeParts {
    pub llm: Arc<dyn LlmClient>,
    pub sessions: Arc<dyn SessionStore>,
    pub sales: Arc<dyn SalesRepository>,
    pub tools: ToolRegistry,
    pub forecaster: Option<Arc<dyn ForecastProvider>>,
    pub clock: Arc<dyn Clock>,
}

impl RuntimeParts {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        sessions: Arc<dyn SessionStore>,
        sales: Arc<dyn SalesRepository>,
        tools: ToolRegistry,
    ) -> Self {
        Self { llm, sessions, sales, tools, forecaster: None, clock: Arc::new(SystemClock) }
    }

    pub fn with_forecaster(mut self, forecaster: Arc<dyn ForecastProvider>) -> Self {
        self.forecaster = Some(forecaster);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub session_id: SessionId,
    pub message: String,
    pub correlation_id: String,
}

impl TurnRequest {
    pub fn new(session_id: SessionId, message: impl Into<String>) -> Self {
        Self {
            session_id,
            message: message.into(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnReply {
    pub session_id: SessionId,
    pub response: String,
    pub route: Route,
    pub is_error: bool,
    pub correlation_id: String,
}

/// A finished answer that has not been persisted yet.
struct AnsweredTurn {
    content: MessageContent,
    route: Route,
    is_error: bool,
}

/// Conversation orchestrator: classify, route, run exactly one handler,
/// persist the exchange.
pub struct AgentRuntime {
    classifier: IntentClassifier,
    normal: Arc<dyn PathHandler>,
    analytical: Arc<dyn PathHandler>,
    forecasting: Arc<dyn PathHandler>,
    conversation: ConversationLog,
    clock: Arc<dyn Clock>,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    pub fn new(parts: RuntimeParts, settings: RuntimeSettings) -> Result<Self, PromptError> {
        let prompts = Arc::new(Prompts::new()?);
        let RuntimeParts { llm, sessions, sales, tools, forecaster, clock } = parts;

        Ok(Self {
            classifier: IntentClassifier::new(Arc::clone(&llm), Arc::clone(&prompts)),
            normal: Arc::new(NormalHandler::new(Arc::clone(&llm), Arc::clone(&prompts))),
            analytical: Arc::new(AnalyticalHandler::new(
                Arc::clone(&llm),
                Arc::clone(&prompts),
                &tools,
                settings.step_ceiling,
                settings.default_row_limit,
            )),
            forecasting: Arc::new(ForecastingHandler::new(
                llm,
                prompts,
                sales,
                forecaster,
                settings.default_horizon,
                settings.quantile_levels.clone(),
            )),
            conversation: ConversationLog::new(sessions, settings.history_window),
            clock,
            settings,
        })
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        self.conversation.store()
    }

    fn handler_for(&self, route: Route) -> &dyn PathHandler {
        match route {
            Route::Normal => self.normal.as_ref(),
            Route::Analytical => self.analytical.as_ref(),
            Route::Forecasting => self.forecasting.as_ref(),
        }
    }

    /// Runs one turn. Returns exactly one assistant reply, or a terminal
    /// error when the turn could not be classified, persisted, or finished in
    /// time. Only classification and handling count against the turn
    /// timeout; the exchange is then written in a single store call, so a
    /// turn that fails leaves the session untouched.
    pub async fn handle_turn(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> Result<TurnReply, TurnError> {
        info!(
            event_name = "agent.turn.started",
            correlation_id = %request.correlation_id,
            session_id = %request.session_id,
            message_chars = request.message.chars().count(),
            "turn started"
        );

        let result = match self.answer_within_deadline(&request, &cancel).await {
            Ok(answer) => self.persist(&request, answer).await,
            Err(error) => Err(error),
        };

        if let Err(error) = &result {
            warn!(
                event_name = "agent.turn.failed",
                correlation_id = %request.correlation_id,
                session_id = %request.session_id,
                error = %error,
                "turn failed"
            );
        }
        result
    }

    async fn answer_within_deadline(
        &self,
        request: &TurnRequest,
        cancel: &CancellationToken,
    ) -> Result<AnsweredTurn, TurnError> {
        let timeout = self.settings.turn_timeout;
        match tokio::time::timeout(timeout, self.run_turn(request, cancel)).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(TurnError::TimedOut(timeout.as_secs()))
            }
        }
    }

    async fn persist(
        &self,
        request: &TurnRequest,
        answer: AnsweredTurn,
    ) -> Result<TurnReply, TurnError> {
        let AnsweredTurn { content, route, is_error } = answer;
        let response = content.primary_text();
        self.conversation
            .record_exchange(&request.session_id, &request.message, content, Some(route), is_error)
            .await?;

        info!(
            event_name = "agent.turn.completed",
            correlation_id = %request.correlation_id,
            session_id = %request.session_id,
            route = %route,
            is_error,
            "turn completed"
        );

        Ok(TurnReply {
            session_id: request.session_id.clone(),
            response,
            route,
            is_error,
            correlation_id: request.correlation_id.clone(),
        })
    }

    async fn run_turn(
        &self,
        request: &TurnRequest,
        cancel: &CancellationToken,
    ) -> Result<AnsweredTurn, TurnError> {
        validate_message(&request.message, self.settings.max_message_chars)?;

        let history = if self.settings.include_history {
            self.conversation.recent_history(&request.session_id).await?
        } else {
            None
        };
        let reference_date = self
            .settings
            .reference_date
            .clone()
            .unwrap_or_else(|| reference_date(self.clock.now()));

        let mut flow = TurnFlow::new(TurnState::new(vec![Message::user(request.message.as_str())]));

        let message_type = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TurnError::Cancelled),
            classified = self.classifier.classify(flow.state(), &reference_date) => classified?,
        };
        let route = flow.classified(Some(message_type))?;
        info!(
            event_name = "agent.router.routed",
            correlation_id = %request.correlation_id,
            message_type = %message_type,
            route = %route,
            "turn routed"
        );

        let outcome = self
            .handler_for(route)
            .handle(HandlerContext {
                state: flow.state(),
                reference_date: &reference_date,
                history: history.as_deref(),
                cancel,
                correlation_id: &request.correlation_id,
            })
            .await;

        let (content, is_error) = match outcome {
            HandlerOutcome::Answered { content, .. } if content.primary_text().trim().is_empty() => {
                (MessageContent::from(EMPTY_ANSWER_FALLBACK), false)
            }
            HandlerOutcome::Answered { content, .. } => (content, false),
            HandlerOutcome::StepCeilingReached { steps } => (
                MessageContent::Text(format!(
                    "I couldn't resolve that question within {steps} steps. Try asking something \
                     more specific."
                )),
                true,
            ),
            HandlerOutcome::Failed { reason } => (
                MessageContent::Text(format!("Sorry, I couldn't complete that request: {reason}")),
                true,
            ),
            HandlerOutcome::Cancelled => return Err(TurnError::Cancelled),
        };

        flow.responded(Message::assistant(content.clone()))?;
        Ok(AnsweredTurn { content, route, is_error })
    }
}
