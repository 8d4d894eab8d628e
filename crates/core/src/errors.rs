use thiserror::Error;

use crate::flows::FlowTransitionError;

/// Everything that can stop a diagnostic turn.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DiagnosticError {
    #[error("{0}")]
    Validation(String),
    /// The model answered with something that is not a decision object.
    /// `raw_output` is the text exactly as received.
    #[error("failed to decode reasoning output: {message}")]
    Decode { message: String, raw_output: String },
    #[error("decision requested a query but supplied no query text")]
    EmptyQuery,
    #[error("query rejected ({reason_code}): {message}")]
    QueryRejected { reason_code: String, message: String },
    #[error("query execution failed: {0}")]
    QueryExecution(String),
    #[error("reasoning capability failed: {0}")]
    Reasoning(String),
    #[error("reasoning capability timed out after {timeout_secs}s")]
    ReasoningTimeout { timeout_secs: u64 },
    #[error("session store failure: {0}")]
    Store(String),
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
}

impl DiagnosticError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Decode { .. } => "decode",
            Self::EmptyQuery | Self::QueryRejected { .. } => "query_rejected",
            Self::QueryExecution(_) => "query_execution",
            Self::Reasoning(_) => "reasoning_unavailable",
            Self::ReasoningTimeout { .. } => "reasoning_timeout",
            Self::Store(_) => "store_unavailable",
            Self::FlowTransition(_) => "internal",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let error_class = self.error_class();
        match self {
            Self::Validation(message) => {
                InterfaceError::BadRequest { error_class, message, correlation_id }
            }
            Self::Decode { raw_output, .. } => InterfaceError::BadGateway {
                error_class,
                message: "Failed to decode LLM response JSON.".to_owned(),
                llm_response: raw_output,
                correlation_id,
            },
            Self::EmptyQuery => InterfaceError::Unprocessable {
                error_class,
                message: "Unable to generate a database query.".to_owned(),
                correlation_id,
            },
            Self::QueryRejected { message, .. } => {
                InterfaceError::Unprocessable { error_class, message, correlation_id }
            }
            Self::Reasoning(message) | Self::Store(message) => {
                InterfaceError::ServiceUnavailable { error_class, message, correlation_id }
            }
            Self::ReasoningTimeout { timeout_secs } => InterfaceError::GatewayTimeout {
                error_class,
                message: format!("reasoning capability did not answer within {timeout_secs}s"),
                correlation_id,
            },
            Self::QueryExecution(message) => {
                InterfaceError::Internal { error_class, message, correlation_id }
            }
            Self::FlowTransition(error) => {
                InterfaceError::Internal { error_class, message: error.to_string(), correlation_id }
            }
        }
    }
}

/// Error shape handed to callers of the HTTP and CLI surfaces.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { error_class: &'static str, message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { error_class: &'static str, message: String, correlation_id: String },
    #[error("bad gateway: {message}")]
    BadGateway {
        error_class: &'static str,
        message: String,
        llm_response: String,
        correlation_id: String,
    },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { error_class: &'static str, message: String, correlation_id: String },
    #[error("gateway timeout: {message}")]
    GatewayTimeout { error_class: &'static str, message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { error_class: &'static str, message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::Unprocessable { .. } => 422,
            Self::BadGateway { .. } => 502,
            Self::ServiceUnavailable { .. } => 503,
            Self::GatewayTimeout { .. } => 504,
            Self::Internal { .. } => 500,
        }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::BadRequest { error_class, .. }
            | Self::Unprocessable { error_class, .. }
            | Self::BadGateway { error_class, .. }
            | Self::ServiceUnavailable { error_class, .. }
            | Self::GatewayTimeout { error_class, .. }
            | Self::Internal { error_class, .. } => error_class,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Unprocessable { message, .. }
            | Self::BadGateway { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::GatewayTimeout { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unprocessable { correlation_id, .. }
            | Self::BadGateway { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::GatewayTimeout { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    /// Raw model output, only present for decode failures.
    pub fn llm_response(&self) -> Option<&str> {
        match self {
            Self::BadGateway { llm_response, .. } => Some(llm_response),
            _ => None,
        }
    }

    /// Text safe to show an end user. Validation messages are already
    /// user-facing, so they pass through.
    pub fn user_message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. } => message,
            Self::Unprocessable { .. } => {
                "The generated query was refused. Try rephrasing the question."
            }
            Self::BadGateway { message, .. } => message,
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::GatewayTimeout { .. } => {
                "The diagnostic assistant took too long to answer. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}
