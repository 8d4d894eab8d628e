use std::sync::Arc;

use boilerbrain_agent::llm::{HttpLlmClient, LlmClient, LlmError, ResilientLlmClient, RetryPolicy};
use boilerbrain_agent::runtime::ConversationOrchestrator;
use boilerbrain_core::config::AppConfig;
use boilerbrain_core::errors::DiagnosticError;
use boilerbrain_db::{connect_with_settings, migrations, DbPool, DiagnosticStore, SqlDiagnosticStore};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub store: Arc<dyn DiagnosticStore>,
    pub orchestrator: Arc<ConversationOrchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("reasoning client setup failed: {0}")]
    Reasoning(#[source] LlmError),
    #[error("orchestrator setup failed: {0}")]
    Orchestrator(#[source] DiagnosticError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let llm = HttpLlmClient::from_config(&config.llm).map_err(BootstrapError::Reasoning)?;
    let llm: Arc<dyn LlmClient> =
        Arc::new(ResilientLlmClient::new(llm, RetryPolicy::from_config(&config.llm)));
    let store: Arc<dyn DiagnosticStore> = Arc::new(SqlDiagnosticStore::new(db_pool.clone()));

    let orchestrator =
        ConversationOrchestrator::from_config(Arc::clone(&store), llm, &config.diagnostics)
            .map_err(BootstrapError::Orchestrator)?;

    Ok(Application { config, db_pool, store, orchestrator: Arc::new(orchestrator) })
}
