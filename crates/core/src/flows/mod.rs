pub mod engine;
pub mod states;

pub use engine::{FlowTransitionError, RequestFlow};
pub use states::{RequestAction, RequestEvent, RequestState, TransitionOutcome};
