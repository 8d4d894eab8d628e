use serde::{Deserialize, Serialize};

use crate::domain::decision::DecisionAction;

/// Lifecycle of a single diagnostic turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    AwaitingDecision,
    Acting,
    Persisted,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Persisted | Self::Failed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestEvent {
    DecisionParsed { action: DecisionAction },
    ReplyCommitted,
    StageFailed { stage: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestAction {
    ReplyVerbatim,
    RewriteAndExecuteQuery,
    AnnotateReasoning,
    ReplyOrClarify,
    AppendTurns,
    RollBack,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: RequestState,
    pub to: RequestState,
    pub event: RequestEvent,
    pub actions: Vec<RequestAction>,
}
