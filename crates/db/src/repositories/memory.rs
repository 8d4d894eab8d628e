use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use boilerbrain_core::domain::finding::QueryResultRow;
use boilerbrain_core::domain::session::{History, SessionId, Turn};

use super::schema::{render_table_info, TableSample};
use super::{DiagnosticStore, QueryError, RepositoryError, StoreTransaction};

/// Stages where an [`InMemoryDiagnosticStore`] can be told to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    Begin,
    Read,
    Load,
    Query,
    Save,
    Commit,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryTable {
    pub create_sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Default)]
struct MemoryState {
    sessions: BTreeMap<String, History>,
    tables: BTreeMap<String, MemoryTable>,
    scripted_rows: VecDeque<Option<QueryResultRow>>,
    executed_queries: Vec<String>,
    failures: HashSet<FailurePoint>,
    commits: usize,
}

impl MemoryState {
    fn check(&self, point: FailurePoint) -> Result<(), RepositoryError> {
        if self.failures.contains(&point) {
            return Err(RepositoryError::Decode(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

/// Store double for orchestrator tests. Knowledge queries are not evaluated;
/// each one pops the next scripted row instead.
#[derive(Clone, Default)]
pub struct InMemoryDiagnosticStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryDiagnosticStore {
    pub async fn add_table(&self, name: impl Into<String>, table: MemoryTable) {
        self.state.write().await.tables.insert(name.into(), table);
    }

    /// Result for the next knowledge query; `None` means "no rows".
    pub async fn push_query_result(&self, row: Option<QueryResultRow>) {
        self.state.write().await.scripted_rows.push_back(row);
    }

    pub async fn fail_at(&self, point: FailurePoint) {
        self.state.write().await.failures.insert(point);
    }

    pub async fn executed_queries(&self) -> Vec<String> {
        self.state.read().await.executed_queries.clone()
    }

    pub async fn commits(&self) -> usize {
        self.state.read().await.commits
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }
}

#[async_trait::async_trait]
impl DiagnosticStore for InMemoryDiagnosticStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, RepositoryError> {
        self.state.read().await.check(FailurePoint::Begin)?;
        Ok(Box::new(InMemoryTransaction { state: Arc::clone(&self.state), staged: BTreeMap::new() }))
    }

    async fn history(&self, session_id: &SessionId) -> Result<Option<History>, RepositoryError> {
        let state = self.state.read().await;
        state.check(FailurePoint::Read)?;
        Ok(state.sessions.get(session_id.as_str()).cloned())
    }

    async fn table_names(&self, allowed: &[String]) -> Result<Vec<String>, RepositoryError> {
        let state = self.state.read().await;
        state.check(FailurePoint::Read)?;
        Ok(state.tables.keys().filter(|name| allowed.contains(name)).cloned().collect())
    }

    async fn table_info(
        &self,
        allowed: &[String],
        sample_rows: usize,
    ) -> Result<String, RepositoryError> {
        let state = self.state.read().await;
        state.check(FailurePoint::Read)?;
        let samples = state
            .tables
            .iter()
            .filter(|(name, _)| allowed.contains(name))
            .map(|(name, table)| TableSample {
                name: name.clone(),
                create_sql: table.create_sql.clone(),
                columns: table.columns.clone(),
                rows: table.rows.clone(),
            })
            .collect::<Vec<_>>();
        Ok(render_table_info(&samples, sample_rows))
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.state.read().await.check(FailurePoint::Read)
    }
}

struct InMemoryTransaction {
    state: Arc<RwLock<MemoryState>>,
    staged: BTreeMap<String, History>,
}

#[async_trait::async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn load(&mut self, session_id: &SessionId) -> Result<History, RepositoryError> {
        let state = self.state.read().await;
        state.check(FailurePoint::Load)?;
        if let Some(history) = self.staged.get(session_id.as_str()) {
            return Ok(history.clone());
        }
        let history = state.sessions.get(session_id.as_str()).cloned().unwrap_or_default();
        self.staged.insert(session_id.as_str().to_string(), history.clone());
        Ok(history)
    }

    async fn append_and_save(
        &mut self,
        session_id: &SessionId,
        history_before: History,
        new_turns: Vec<Turn>,
    ) -> Result<History, RepositoryError> {
        self.state.read().await.check(FailurePoint::Save)?;
        let mut history = history_before;
        for turn in new_turns {
            history.push(turn);
        }
        self.staged.insert(session_id.as_str().to_string(), history.clone());
        Ok(history)
    }

    async fn first_row(
        &mut self,
        sql: &str,
        _timeout: Duration,
    ) -> Result<Option<QueryResultRow>, QueryError> {
        if sql.trim().is_empty() {
            return Err(QueryError::Empty);
        }
        let mut state = self.state.write().await;
        state.executed_queries.push(sql.to_string());
        if state.failures.contains(&FailurePoint::Query) {
            return Err(QueryError::Execution("injected failure at Query".to_string()));
        }
        Ok(state.scripted_rows.pop_front().flatten())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.check(FailurePoint::Commit)?;
        state.sessions.extend(self.staged);
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        Ok(())
    }
}
