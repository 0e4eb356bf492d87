use serde::{Deserialize, Serialize};

use crate::domain::intent::{MessageType, Route};
use crate::domain::message::{Message, Role};

/// Per-invocation unit of work. Built fresh for every turn and dropped once the
/// handler has answered.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnState {
    messages: Vec<Message>,
    pub message_type: Option<MessageType>,
    pub next: Option<Route>,
}

impl TurnState {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages, message_type: None, next: None }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn latest_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(Message::text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnPhase {
    Classify,
    Route,
    Handle(Route),
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnEvent {
    Classified(Option<MessageType>),
    Routed(Route),
    Responded,
}

/// Phases of the analytical reason/act/observe loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentPhase {
    Reason,
    Act,
    Observe,
    Answer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentEvent {
    ToolRequested,
    ToolExecuted,
    ObservationRecorded,
    FinalAnswer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome<P, E> {
    pub from: P,
    pub to: P,
    pub event: E,
}
