use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "chat_sessions",
        "boiler_models",
        "boiler_manuals",
        "boiler_fault_codes",
        "boiler_components",
        "diagnostic_symptoms",
        "diagnostic_procedures",
        "symptom_fault_relationships",
        "knowledge_base",
        "repair_histories",
        "idx_boiler_fault_codes_lookup",
        "idx_boiler_manuals_model_name",
        "idx_symptom_fault_relationships_symptom_id",
    ];

    async fn table_exists(pool: &sqlx::SqlitePool, name: &str) -> bool {
        sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("check table")
        .get::<i64, _>("count")
            == 1
    }

    #[tokio::test]
    async fn migrations_create_session_and_knowledge_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in MANAGED_SCHEMA_OBJECTS.iter().filter(|name| !name.starts_with("idx_")) {
            assert!(table_exists(&pool, table).await, "missing table {table}");
        }
    }

    #[tokio::test]
    async fn new_session_row_defaults_to_empty_history() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query("INSERT INTO chat_sessions (session_id) VALUES ('s-1')")
            .execute(&pool)
            .await
            .expect("insert session");
        let history: String =
            sqlx::query_scalar("SELECT history FROM chat_sessions WHERE session_id = 's-1'")
                .fetch_one(&pool)
                .await
                .expect("read history");
        assert_eq!(history, "[]");
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(initial_signature.len(), MANAGED_SCHEMA_OBJECTS.len());

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        assert!(managed_schema_signature(&pool).await.is_empty());

        run_pending(&pool).await.expect("re-run migrations");
        assert_eq!(managed_schema_signature(&pool).await, initial_signature);
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
