//! The three handling paths a routed turn can take.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use salescope_core::domain::intent::Route;
use salescope_core::domain::message::MessageContent;
use salescope_core::flows::TurnState;

pub mod analytical;
pub mod forecasting;
pub mod normal;

pub use analytical::AnalyticalHandler;
pub use forecasting::ForecastingHandler;
pub use normal::NormalHandler;

/// Everything a handler may read for one turn.
#[derive(Clone, Copy, Debug)]
pub struct HandlerContext<'a> {
    pub state: &'a TurnState,
    pub reference_date: &'a str,
    /// Formatted prior exchanges, present only when history feeding is enabled.
    pub history: Option<&'a str>,
    pub cancel: &'a CancellationToken,
    pub correlation_id: &'a str,
}

impl HandlerContext<'_> {
    pub fn latest_user_text(&self) -> String {
        self.state.latest_user_text().unwrap_or_default()
    }
}

/// How a handler finished. Every variant except `Cancelled` is rendered as
/// exactly one assistant message by the orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub enum HandlerOutcome {
    Answered { content: MessageContent, tool_calls: u32 },
    StepCeilingReached { steps: u32 },
    Failed { reason: String },
    Cancelled,
}

impl HandlerOutcome {
    pub fn answered(content: impl Into<MessageContent>) -> Self {
        Self::Answered { content: content.into(), tool_calls: 0 }
    }
}

#[async_trait]
pub trait PathHandler: Send + Sync {
    fn route(&self) -> Route;
    async fn handle(&self, context: HandlerContext<'_>) -> HandlerOutcome;
}
