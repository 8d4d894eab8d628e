use thiserror::Error;

use crate::domain::decision::DecisionAction;
use crate::flows::states::{RequestAction, RequestEvent, RequestState, TransitionOutcome};

#[derive(Clone, Debug, Default)]
pub struct RequestFlow;

impl RequestFlow {
    pub fn initial_state(&self) -> RequestState {
        RequestState::AwaitingDecision
    }

    pub fn apply(
        &self,
        current: &RequestState,
        event: &RequestEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        use RequestAction::{
            AnnotateReasoning, AppendTurns, ReplyOrClarify, ReplyVerbatim, RewriteAndExecuteQuery,
            RollBack,
        };
        use RequestState::{Acting, AwaitingDecision, Failed, Persisted};

        let (to, actions) = match (current, event) {
            (AwaitingDecision, RequestEvent::DecisionParsed { action }) => {
                let act = match action {
                    DecisionAction::Ask => ReplyVerbatim,
                    DecisionAction::Query => RewriteAndExecuteQuery,
                    DecisionAction::FallbackReasoning => AnnotateReasoning,
                    DecisionAction::Other(_) => ReplyOrClarify,
                };
                (Acting, vec![act])
            }
            (Acting, RequestEvent::ReplyCommitted) => (Persisted, vec![AppendTurns]),
            (AwaitingDecision | Acting, RequestEvent::StageFailed { .. }) => {
                (Failed, vec![RollBack])
            }
            _ => {
                return Err(FlowTransitionError::InvalidTransition {
                    state: current.clone(),
                    event: event.clone(),
                });
            }
        };

        Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: RequestState, event: RequestEvent },
}

#[cfg(test)]
mod tests {
    use crate::domain::decision::DecisionAction;
    use crate::flows::engine::{FlowTransitionError, RequestFlow};
    use crate::flows::states::{RequestAction, RequestEvent, RequestState};

    #[test]
    fn query_decision_runs_to_persisted() {
        let flow = RequestFlow;
        let acting = flow
            .apply(
                &flow.initial_state(),
                &RequestEvent::DecisionParsed { action: DecisionAction::Query },
            )
            .expect("awaiting -> acting");
        assert_eq!(acting.to, RequestState::Acting);
        assert_eq!(acting.actions, vec![RequestAction::RewriteAndExecuteQuery]);

        let persisted =
            flow.apply(&acting.to, &RequestEvent::ReplyCommitted).expect("acting -> persisted");
        assert_eq!(persisted.to, RequestState::Persisted);
        assert!(persisted.to.is_terminal());
    }

    #[test]
    fn unknown_action_asks_for_clarification() {
        let outcome = RequestFlow
            .apply(
                &RequestState::AwaitingDecision,
                &RequestEvent::DecisionParsed { action: DecisionAction::Other("escalate".into()) },
            )
            .expect("unknown actions are still handled");
        assert_eq!(outcome.actions, vec![RequestAction::ReplyOrClarify]);
    }

    #[test]
    fn failure_from_any_live_state_rolls_back() {
        for state in [RequestState::AwaitingDecision, RequestState::Acting] {
            let outcome = RequestFlow
                .apply(&state, &RequestEvent::StageFailed { stage: "decode".into() })
                .expect("live states can fail");
            assert_eq!(outcome.to, RequestState::Failed);
            assert_eq!(outcome.actions, vec![RequestAction::RollBack]);
        }
    }

    #[test]
    fn terminal_states_accept_no_events() {
        let error = RequestFlow
            .apply(&RequestState::Persisted, &RequestEvent::StageFailed { stage: "late".into() })
            .expect_err("persisted is terminal");
        assert!(matches!(
            error,
            FlowTransitionError::InvalidTransition { state: RequestState::Persisted, .. }
        ));

        assert!(RequestFlow.apply(&RequestState::AwaitingDecision, &RequestEvent::ReplyCommitted).is_err());
    }
}
