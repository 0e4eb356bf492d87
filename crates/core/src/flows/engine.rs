use thiserror::Error;

use crate::domain::intent::{MessageType, Route};
use crate::domain::message::Message;
use crate::flows::router::route;
use crate::flows::states::{AgentEvent, AgentPhase, TransitionOutcome, TurnEvent, TurnPhase, TurnState};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid turn transition from {phase:?} using event {event:?}")]
    InvalidTurnTransition { phase: TurnPhase, event: TurnEvent },
    #[error("invalid agent transition from {phase:?} using event {event:?}")]
    InvalidAgentTransition { phase: AgentPhase, event: AgentEvent },
    #[error("step ceiling of {ceiling} reached")]
    StepCeilingReached { ceiling: u32 },
}

pub fn transition_turn(
    current: TurnPhase,
    event: TurnEvent,
) -> Result<TransitionOutcome<TurnPhase, TurnEvent>, FlowTransitionError> {
    let to = match (current, event) {
        (TurnPhase::Classify, TurnEvent::Classified(_)) => TurnPhase::Route,
        (TurnPhase::Route, TurnEvent::Routed(selected)) => TurnPhase::Handle(selected),
        (TurnPhase::Handle(_), TurnEvent::Responded) => TurnPhase::Complete,
        _ => return Err(FlowTransitionError::InvalidTurnTransition { phase: current, event }),
    };

    Ok(TransitionOutcome { from: current, to, event })
}

pub fn transition_agent(
    current: AgentPhase,
    event: AgentEvent,
) -> Result<TransitionOutcome<AgentPhase, AgentEvent>, FlowTransitionError> {
    use AgentEvent::{FinalAnswer, ObservationRecorded, ToolExecuted, ToolRequested};
    use AgentPhase::{Act, Answer, Observe, Reason};

    let to = match (current, event) {
        (Reason, ToolRequested) => Act,
        (Act, ToolExecuted) => Observe,
        (Observe, ObservationRecorded) => Reason,
        (Reason, FinalAnswer) => Answer,
        _ => return Err(FlowTransitionError::InvalidAgentTransition { phase: current, event }),
    };

    Ok(TransitionOutcome { from: current, to, event })
}

/// Drives one turn through classify -> route -> handle -> complete while
/// recording the classification and selected route on the turn state.
#[derive(Debug)]
pub struct TurnFlow {
    phase: TurnPhase,
    state: TurnState,
}

impl TurnFlow {
    pub fn new(state: TurnState) -> Self {
        Self { phase: TurnPhase::Classify, state }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    pub fn classified(
        &mut self,
        message_type: Option<MessageType>,
    ) -> Result<Route, FlowTransitionError> {
        self.phase = transition_turn(self.phase, TurnEvent::Classified(message_type))?.to;
        self.state.message_type = message_type;

        let selected = route(self.state.message_type);
        self.phase = transition_turn(self.phase, TurnEvent::Routed(selected))?.to;
        self.state.next = Some(selected);
        Ok(selected)
    }

    pub fn responded(&mut self, reply: Message) -> Result<(), FlowTransitionError> {
        self.phase = transition_turn(self.phase, TurnEvent::Responded)?.to;
        self.state.next = None;
        self.state.push(reply);
        Ok(())
    }

    pub fn into_state(self) -> TurnState {
        self.state
    }
}

/// Counts entries into the `Reason` phase against a hard ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepBudget {
    ceiling: u32,
    used: u32,
}

impl StepBudget {
    pub fn new(ceiling: u32) -> Self {
        Self { ceiling, used: 0 }
    }

    pub fn consume(&mut self) -> Result<u32, FlowTransitionError> {
        if self.used >= self.ceiling {
            return Err(FlowTransitionError::StepCeilingReached { ceiling: self.ceiling });
        }
        self.used += 1;
        Ok(self.used)
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }
}
