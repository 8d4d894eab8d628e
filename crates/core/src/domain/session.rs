use serde::{Deserialize, Serialize};

use crate::errors::DiagnosticError;

/// Externally supplied, opaque session key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn parse(raw: &str) -> Result<Self, DiagnosticError> {
        if raw.trim().is_empty() {
            return Err(DiagnosticError::Validation("No session ID provided".to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in a session history. Serialized as `{"role", "content"}`,
/// which is also the persisted shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Ordered, append-only conversation history.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History(Vec<Turn>);

impl History {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self(turns)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, turn: Turn) {
        self.0.push(turn);
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::{History, Role, SessionId, Turn};
    use crate::errors::DiagnosticError;

    #[test]
    fn blank_session_ids_are_rejected() {
        for raw in ["", "   ", "\t"] {
            assert!(matches!(SessionId::parse(raw), Err(DiagnosticError::Validation(_))));
        }
    }

    #[test]
    fn session_id_is_kept_verbatim() {
        let id = SessionId::parse(" abc-123 ").expect("non-blank id");
        assert_eq!(id.as_str(), " abc-123 ");
    }

    #[test]
    fn history_serializes_as_plain_role_content_array() {
        let mut history = History::default();
        history.push(Turn::user("Boiler shows F1"));
        history.push(Turn::assistant("What type of heating system?"));

        let json = serde_json::to_string(&history).expect("serialize history");
        assert_eq!(
            json,
            r#"[{"role":"user","content":"Boiler shows F1"},{"role":"assistant","content":"What type of heating system?"}]"#
        );

        let parsed: History = serde_json::from_str(&json).expect("parse history");
        assert_eq!(parsed.turns()[1].role, Role::Assistant);
    }
}
