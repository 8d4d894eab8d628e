use serde_json::{Map, Value};
use tera::{Context, Tera};
use thiserror::Error;

use boilerbrain_core::domain::session::History;
use boilerbrain_core::errors::DiagnosticError;

const TEMPLATE_NAME: &str = "diagnostic_workflow.txt";
pub const DIAGNOSTIC_WORKFLOW_TEMPLATE: &str =
    include_str!("../../../templates/prompts/diagnostic_workflow.txt");

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt template is invalid: {0}")]
    Template(#[source] tera::Error),
    #[error("prompt rendering failed: {0}")]
    Render(#[source] tera::Error),
    #[error("prompt input could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<PromptError> for DiagnosticError {
    fn from(error: PromptError) -> Self {
        DiagnosticError::Reasoning(error.to_string())
    }
}

/// Everything the model sees for one turn.
#[derive(Clone, Copy, Debug)]
pub struct PromptInput<'a> {
    /// Includes the turn being asked.
    pub history: &'a History,
    pub context: &'a Map<String, Value>,
    pub table_info: &'a str,
    pub question: &'a str,
}

/// Renders the diagnostic workflow prompt. Output depends only on the input,
/// so identical turns always produce byte-identical prompts.
pub struct PromptBuilder {
    tera: Tera,
}

impl PromptBuilder {
    pub fn new() -> Result<Self, PromptError> {
        Self::with_template(DIAGNOSTIC_WORKFLOW_TEMPLATE)
    }

    pub fn with_template(template: &str) -> Result<Self, PromptError> {
        let mut tera = Tera::default();
        tera.autoescape_on(Vec::new());
        tera.add_raw_template(TEMPLATE_NAME, template).map_err(PromptError::Template)?;
        Ok(Self { tera })
    }

    pub fn build(&self, input: PromptInput<'_>) -> Result<String, PromptError> {
        let mut context = Context::new();
        // Indentation is part of the prompt contract. serde_json maps keep
        // keys sorted.
        context.insert("chat_history", &serde_json::to_string_pretty(input.history)?);
        context.insert("context", &serde_json::to_string_pretty(input.context)?);
        context.insert("table_info", input.table_info);
        context.insert("question", input.question);

        self.tera.render(TEMPLATE_NAME, &context).map_err(PromptError::Render)
    }
}
