use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use boilerbrain_core::config::LlmConfig;
use boilerbrain_db::DiagnosticStore;
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    store: Arc<dyn DiagnosticStore>,
    reasoning: String,
}

impl HealthState {
    pub fn new(store: Arc<dyn DiagnosticStore>, llm: &LlmConfig) -> Self {
        Self { store, reasoning: format!("{} model `{}`", llm.provider.as_str(), llm.model) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub reasoning: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn spawn(bind_address: &str, port: u16, state: HealthState) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

/// The reasoning provider is reported as configured only; probing it would
/// spend tokens on every check.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match state.store.ping().await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    };
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "boilerbrain-server runtime initialized".to_string(),
        },
        database,
        reasoning: HealthCheck { status: "configured", detail: state.reasoning.clone() },
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use boilerbrain_core::config::AppConfig;
    use boilerbrain_db::{connect_with_settings, SqlDiagnosticStore};

    use crate::health::{health, HealthState};

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        let state =
            HealthState::new(Arc::new(SqlDiagnosticStore::new(pool.clone())), &AppConfig::default().llm);

        let (status, Json(payload)) = health(State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.reasoning.detail, "ollama model `llama3.1`");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        pool.close().await;
        let state = HealthState::new(Arc::new(SqlDiagnosticStore::new(pool)), &AppConfig::default().llm);

        let (status, Json(payload)) = health(State(state)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }
}
