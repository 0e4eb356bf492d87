pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::intent::{MessageType, Route};
pub use domain::message::{ContentBlock, Message, MessageContent, Role};
pub use domain::session::{SessionEntry, SessionId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{route, FlowTransitionError, TurnFlow, TurnState};
