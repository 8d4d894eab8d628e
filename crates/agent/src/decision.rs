//! Decoding of the reasoning model's reply into a [`WorkflowDecision`].

use serde::Deserialize;
use serde_json::{Map, Value};

use boilerbrain_core::domain::decision::{DecisionAction, WorkflowDecision};
use boilerbrain_core::errors::DiagnosticError;

/// Wire shape of the decision contract. Every field may be missing or null.
#[derive(Debug, Default, Deserialize)]
struct RawDecision {
    action: Option<String>,
    response: Option<String>,
    context_update: Option<Map<String, Value>>,
    sql_query: Option<String>,
    manual_link: Option<String>,
    regulation_ref: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct DecisionParser;

impl DecisionParser {
    /// Fails with [`DiagnosticError::Decode`] carrying the untouched input
    /// whenever the text is not a decision object. There is no default
    /// decision to fall back on.
    pub fn parse(&self, raw_output: &str) -> Result<WorkflowDecision, DiagnosticError> {
        let payload = strip_fences(raw_output);
        let decoded: RawDecision = serde_json::from_str(payload).map_err(|error| {
            DiagnosticError::Decode { message: error.to_string(), raw_output: raw_output.to_string() }
        })?;

        let action = DecisionAction::from_raw(decoded.action.as_deref().unwrap_or_default());
        let sql_query = match action {
            DecisionAction::Query => decoded.sql_query,
            _ => None,
        };

        Ok(WorkflowDecision {
            action,
            response: decoded.response.unwrap_or_default(),
            context_update: decoded.context_update.unwrap_or_default(),
            sql_query,
            manual_link: decoded.manual_link.unwrap_or_default(),
            regulation_ref: decoded.regulation_ref.unwrap_or_default(),
        })
    }
}

/// Removes a leading ```` ```json ```` or bare ```` ``` ```` fence and a
/// trailing ```` ``` ````, then trims.
pub fn strip_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    }
    if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}
