use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use boilerbrain_core::domain::finding::QueryResultRow;
use boilerbrain_core::domain::session::{History, SessionId, Turn};
use boilerbrain_core::errors::DiagnosticError;

pub mod memory;
pub mod schema;
pub mod session;

pub use memory::{FailurePoint, InMemoryDiagnosticStore, MemoryTable};
pub use schema::{render_table_info, TableSample, MAX_SAMPLE_VALUE_CHARS};
pub use session::{SqlDiagnosticStore, SqlStoreTransaction};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for DiagnosticError {
    fn from(error: RepositoryError) -> Self {
        DiagnosticError::Store(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query text is empty")]
    Empty,
    #[error("query failed: {0}")]
    Execution(String),
    #[error("query exceeded {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

impl From<sqlx::Error> for QueryError {
    fn from(error: sqlx::Error) -> Self {
        Self::Execution(error.to_string())
    }
}

impl From<QueryError> for DiagnosticError {
    fn from(error: QueryError) -> Self {
        match error {
            QueryError::Empty => DiagnosticError::EmptyQuery,
            other => DiagnosticError::QueryExecution(other.to_string()),
        }
    }
}

/// Durable home of session histories and the diagnostic knowledge tables.
///
/// Reads that only feed the prompt go straight to the store. Everything that
/// must land together (session creation, the knowledge query and the history
/// write) happens on a [`StoreTransaction`].
#[async_trait]
pub trait DiagnosticStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, RepositoryError>;

    /// Read-only lookup; never creates the session.
    async fn history(&self, session_id: &SessionId) -> Result<Option<History>, RepositoryError>;

    /// Allow-listed tables that actually exist, sorted by name.
    async fn table_names(&self, allowed: &[String]) -> Result<Vec<String>, RepositoryError>;

    async fn table_info(
        &self,
        allowed: &[String],
        sample_rows: usize,
    ) -> Result<String, RepositoryError>;

    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// One request's unit of work. Dropping it without [`commit`] discards every
/// change made through it.
///
/// [`commit`]: StoreTransaction::commit
#[async_trait]
pub trait StoreTransaction: Send {
    /// Current history, creating an empty session when none exists.
    async fn load(&mut self, session_id: &SessionId) -> Result<History, RepositoryError>;

    /// Writes `history_before` followed by `new_turns` as the whole history.
    async fn append_and_save(
        &mut self,
        session_id: &SessionId,
        history_before: History,
        new_turns: Vec<Turn>,
    ) -> Result<History, RepositoryError>;

    /// Runs one read-only statement and returns its first row, if any.
    async fn first_row(
        &mut self,
        sql: &str,
        timeout: Duration,
    ) -> Result<Option<QueryResultRow>, QueryError>;

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError>;
}
