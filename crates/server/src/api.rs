//! Diagnostic HTTP surface.
//!
//! - `GET  /`                 - liveness text
//! - `GET  /api/tables`       - knowledge tables visible to the reasoning model
//! - `POST /api/text-to-sql`  - one diagnostic turn for a session

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use boilerbrain_agent::runtime::ConversationOrchestrator;
use boilerbrain_core::domain::request::{DiagnosticReply, DiagnosticRequest};
use boilerbrain_core::errors::{DiagnosticError, InterfaceError};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

pub const INDEX_TEXT: &str = "BoilerBrain server is running!";

#[derive(Clone)]
pub struct ApiState {
    orchestrator: Arc<ConversationOrchestrator>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TextToSqlRequest {
    pub question: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TablesResponse {
    pub tables: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub error_class: &'static str,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_response: Option<String>,
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl ApiError {
    fn from_diagnostic(error: DiagnosticError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.0.user_message().to_string(),
            error_class: self.0.error_class(),
            correlation_id: self.0.correlation_id().to_string(),
            llm_response: self.0.llm_response().map(str::to_string),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(orchestrator: Arc<ConversationOrchestrator>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/tables", get(tables))
        .route("/api/text-to-sql", post(text_to_sql))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ApiState { orchestrator })
}

async fn index() -> &'static str {
    INDEX_TEXT
}

async fn tables(State(state): State<ApiState>) -> Result<Json<TablesResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    match state.orchestrator.table_names().await {
        Ok(tables) => Ok(Json(TablesResponse { tables })),
        Err(error) => {
            error!(
                event_name = "diagnostic.tables.failed",
                correlation_id = %correlation_id,
                error = %error,
                "listing knowledge tables failed"
            );
            Err(ApiError::from_diagnostic(error, &correlation_id))
        }
    }
}

/// Input is validated before anything external is touched. An unreadable
/// body counts as missing input.
async fn text_to_sql(
    State(state): State<ApiState>,
    payload: Result<Json<TextToSqlRequest>, JsonRejection>,
) -> Result<Json<DiagnosticReply>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let body = payload.map(|Json(body)| body).unwrap_or_default();

    let request = DiagnosticRequest::new(body.question.as_deref(), body.session_id.as_deref())
        .map_err(|error| ApiError::from_diagnostic(error, &correlation_id))?;

    state
        .orchestrator
        .handle(&request, &correlation_id)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_diagnostic(error, &correlation_id))
}
