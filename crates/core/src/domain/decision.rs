use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What the reasoning model asked the orchestrator to do next.
///
/// Values outside the known set are carried through untouched so the
/// orchestrator, not the parser, decides how to treat them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecisionAction {
    Ask,
    Query,
    FallbackReasoning,
    Other(String),
}

impl DecisionAction {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "ask" => Self::Ask,
            "query" => Self::Query,
            "fallback_reasoning" => Self::FallbackReasoning,
            other => Self::Other(other.to_string()),
        }
    }

    /// The value exactly as the model produced it.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ask => "ask",
            Self::Query => "query",
            Self::FallbackReasoning => "fallback_reasoning",
            Self::Other(raw) => raw,
        }
    }
}

impl Serialize for DecisionAction {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DecisionAction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_raw(&raw))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDecision {
    pub action: DecisionAction,
    pub response: String,
    pub context_update: Map<String, Value>,
    /// Only ever populated for [`DecisionAction::Query`].
    pub sql_query: Option<String>,
    pub manual_link: String,
    pub regulation_ref: String,
}

impl WorkflowDecision {
    pub fn ask(response: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Ask,
            response: response.into(),
            context_update: Map::new(),
            sql_query: None,
            manual_link: String::new(),
            regulation_ref: String::new(),
        }
    }

    /// Non-blank query text, if the decision carries one.
    pub fn query_text(&self) -> Option<&str> {
        self.sql_query.as_deref().filter(|sql| !sql.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::{DecisionAction, WorkflowDecision};

    #[test]
    fn known_actions_round_trip_through_raw_text() {
        for raw in ["ask", "query", "fallback_reasoning"] {
            assert_eq!(DecisionAction::from_raw(raw).as_str(), raw);
        }
        assert_eq!(DecisionAction::from_raw("Ask"), DecisionAction::Other("Ask".to_string()));
    }

    #[test]
    fn unknown_action_keeps_raw_value() {
        let action = DecisionAction::from_raw("escalate");
        assert_eq!(action, DecisionAction::Other("escalate".to_string()));
        assert_eq!(serde_json::to_string(&action).expect("serialize"), r#""escalate""#);
    }

    #[test]
    fn blank_query_text_counts_as_absent() {
        let mut decision = WorkflowDecision::ask("x");
        decision.sql_query = Some("   ".to_string());
        assert_eq!(decision.query_text(), None);
        decision.sql_query = Some("SELECT 1".to_string());
        assert_eq!(decision.query_text(), Some("SELECT 1"));
    }
}
