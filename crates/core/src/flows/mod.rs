pub mod engine;
pub mod router;
pub mod states;

pub use engine::{transition_agent, transition_turn, FlowTransitionError, StepBudget, TurnFlow};
pub use router::{route, route_label};
pub use states::{AgentEvent, AgentPhase, TransitionOutcome, TurnEvent, TurnPhase, TurnState};
