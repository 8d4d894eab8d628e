use serde::{Deserialize, Serialize};

use crate::domain::session::SessionId;
use crate::errors::DiagnosticError;

/// A validated diagnostic turn, ready for the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagnosticRequest {
    pub session_id: SessionId,
    pub question: String,
}

impl DiagnosticRequest {
    /// The session is checked before the question, so a request missing both
    /// reports the session.
    pub fn new(
        question: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<Self, DiagnosticError> {
        let session_id = SessionId::parse(session_id.unwrap_or_default())?;
        let question = match question {
            Some(question) if !question.trim().is_empty() => question.to_string(),
            _ => return Err(DiagnosticError::Validation("No question provided".to_string())),
        };
        Ok(Self { session_id, question })
    }
}

/// Sentinel for `sql_query` when the turn ran no query.
pub const NO_QUERY_SENTINEL: &str = "N/A";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticReply {
    pub response: String,
    pub sql_query: String,
    pub session_id: String,
    pub manual_link: String,
    pub regulation_ref: String,
    pub action: String,
}

impl DiagnosticReply {
    pub fn ran_query(&self) -> bool {
        self.sql_query != NO_QUERY_SENTINEL
    }
}
