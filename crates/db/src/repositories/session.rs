use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, Sqlite, Transaction, TypeInfo, ValueRef};

use boilerbrain_core::domain::finding::QueryResultRow;
use boilerbrain_core::domain::session::{History, SessionId, Turn};

use super::schema::{render_table_info, TableSample};
use super::{DiagnosticStore, QueryError, RepositoryError, StoreTransaction};
use crate::DbPool;

/// VM steps between deadline checks while a knowledge query runs.
const PROGRESS_HANDLER_OPS: i32 = 1_000;

pub struct SqlDiagnosticStore {
    pool: DbPool,
}

impl SqlDiagnosticStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn existing_tables(
        &self,
        allowed: &[String],
    ) -> Result<Vec<(String, String)>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'view')
             ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>("name"), row.get::<String, _>("sql")))
            .filter(|(name, _)| allowed.iter().any(|candidate| candidate == name))
            .collect())
    }
}

#[async_trait::async_trait]
impl DiagnosticStore for SqlDiagnosticStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, RepositoryError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqlStoreTransaction { tx }))
    }

    async fn history(&self, session_id: &SessionId) -> Result<Option<History>, RepositoryError> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT history FROM chat_sessions WHERE session_id = ?")
                .bind(session_id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        raw.map(|raw| decode_history(&raw)).transpose()
    }

    async fn table_names(&self, allowed: &[String]) -> Result<Vec<String>, RepositoryError> {
        Ok(self.existing_tables(allowed).await?.into_iter().map(|(name, _)| name).collect())
    }

    async fn table_info(
        &self,
        allowed: &[String],
        sample_rows: usize,
    ) -> Result<String, RepositoryError> {
        let mut samples = Vec::new();
        for (name, create_sql) in self.existing_tables(allowed).await? {
            let columns: Vec<String> =
                sqlx::query_scalar("SELECT name FROM pragma_table_info(?) ORDER BY cid")
                    .bind(&name)
                    .fetch_all(&self.pool)
                    .await?;

            let rows = if sample_rows == 0 {
                Vec::new()
            } else {
                // `name` comes from sqlite_master and matched the allow-list.
                sqlx::query(&format!("SELECT * FROM \"{name}\" LIMIT {sample_rows}"))
                    .fetch_all(&self.pool)
                    .await?
                    .iter()
                    .map(|row| {
                        (0..row.columns().len())
                            .map(|index| column_value(row, index).map(display_cell))
                            .collect::<Result<Vec<_>, _>>()
                    })
                    .collect::<Result<Vec<_>, _>>()?
            };

            samples.push(TableSample { name, create_sql, columns, rows });
        }
        Ok(render_table_info(&samples, sample_rows))
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct SqlStoreTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait::async_trait]
impl StoreTransaction for SqlStoreTransaction {
    async fn load(&mut self, session_id: &SessionId) -> Result<History, RepositoryError> {
        // Writing first takes the write lock up front, so the later history
        // update cannot fail on a stale read snapshot.
        sqlx::query(
            "INSERT INTO chat_sessions (session_id, history, created_at, updated_at)
             VALUES (?, '[]', ?, ?)
             ON CONFLICT(session_id) DO NOTHING",
        )
        .bind(session_id.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *self.tx)
        .await?;

        let raw: String =
            sqlx::query_scalar("SELECT history FROM chat_sessions WHERE session_id = ?")
                .bind(session_id.as_str())
                .fetch_one(&mut *self.tx)
                .await?;

        decode_history(&raw)
    }

    async fn append_and_save(
        &mut self,
        session_id: &SessionId,
        history_before: History,
        new_turns: Vec<Turn>,
    ) -> Result<History, RepositoryError> {
        let mut history = history_before;
        for turn in new_turns {
            history.push(turn);
        }
        let encoded = serde_json::to_string(&history)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO chat_sessions (session_id, history, created_at, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                history = excluded.history,
                updated_at = excluded.updated_at",
        )
        .bind(session_id.as_str())
        .bind(encoded)
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *self.tx)
        .await?;

        Ok(history)
    }

    async fn first_row(
        &mut self,
        sql: &str,
        timeout: Duration,
    ) -> Result<Option<QueryResultRow>, QueryError> {
        if sql.trim().is_empty() {
            return Err(QueryError::Empty);
        }

        sqlx::query("PRAGMA query_only = ON").execute(&mut *self.tx).await?;
        let deadline = Instant::now() + timeout;
        self.tx
            .lock_handle()
            .await?
            .set_progress_handler(PROGRESS_HANDLER_OPS, move || Instant::now() < deadline);
        let fetched = sqlx::query(sql).fetch_optional(&mut *self.tx).await;
        self.tx.lock_handle().await?.remove_progress_handler();
        sqlx::query("PRAGMA query_only = OFF").execute(&mut *self.tx).await?;

        let row = match fetched {
            Ok(row) => row,
            Err(_) if Instant::now() >= deadline => {
                return Err(QueryError::Timeout { timeout_secs: timeout.as_secs() });
            }
            Err(error) => return Err(error.into()),
        };
        let Some(row) = row else {
            return Ok(None);
        };
        let mut fields = BTreeMap::new();
        for (index, column) in row.columns().iter().enumerate() {
            let value = column_value(&row, index)
                .map_err(|error| QueryError::Execution(error.to_string()))?;
            fields.insert(column.name().to_string(), value);
        }
        Ok(Some(QueryResultRow::from_fields(fields)))
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn decode_history(raw: &str) -> Result<History, RepositoryError> {
    if raw.trim().is_empty() {
        return Ok(History::default());
    }
    serde_json::from_str(raw).map_err(|error| RepositoryError::Decode(error.to_string()))
}

fn column_value(row: &SqliteRow, index: usize) -> Result<Value, RepositoryError> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();
    let value = match type_name.as_str() {
        "INTEGER" | "INT8" | "BIGINT" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(index)?),
        "REAL" | "FLOAT" | "DOUBLE" => Value::from(row.try_get::<f64, _>(index)?),
        "BLOB" => {
            Value::String(String::from_utf8_lossy(&row.try_get::<Vec<u8>, _>(index)?).into_owned())
        }
        _ => Value::String(row.try_get::<String, _>(index)?),
    };
    Ok(value)
}

fn display_cell(value: Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(text) => text,
        other => other.to_string(),
    }
}
