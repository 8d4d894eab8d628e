use std::time::Duration;

use boilerbrain_core::config::DEFAULT_INCLUDED_TABLES;
use boilerbrain_core::domain::session::SessionId;
use boilerbrain_core::rewrite::QueryRewriter;
use boilerbrain_db::fixtures::SEED_FAULT_CODES;
use boilerbrain_db::{
    connect_with_settings, migrations, DiagnosticStore, KnowledgeSeedDataset, SqlDiagnosticStore,
};

async fn seeded_store() -> SqlDiagnosticStore {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");
    KnowledgeSeedDataset::load(&pool).await.expect("seed");
    SqlDiagnosticStore::new(pool)
}

fn included_tables() -> Vec<String> {
    DEFAULT_INCLUDED_TABLES.iter().map(|name| (*name).to_string()).collect()
}

#[tokio::test]
async fn every_seeded_fault_code_answers_a_lookup() {
    let store = seeded_store().await;
    let mut tx = store.begin().await.expect("begin");

    for seed in SEED_FAULT_CODES {
        let sql = format!(
            "SELECT description, solutions FROM boiler_fault_codes WHERE manufacturer = '{}' AND fault_code = '{}'",
            seed.manufacturer, seed.fault_code
        );
        let row = tx
            .first_row(&sql, Duration::from_secs(5))
            .await
            .expect("lookup")
            .unwrap_or_else(|| panic!("no row for {}", seed.fault_code));

        assert_eq!(row.description(), Some(seed.description));
        assert_eq!(row.solutions().len(), seed.step_count, "{}", seed.fault_code);
    }
}

#[tokio::test]
async fn model_style_alias_query_runs_after_rewrite() {
    let store = seeded_store().await;
    let generated = "SELECT bf.description, bf.solutions, m.pdf_url FROM boiler_fault_codes bf LEFT JOIN boiler_manuals m ON bf.model = m.model_name WHERE bf.manufacturer = 'Ideal' AND bf.fault_code = 'F1'";
    let rewritten = QueryRewriter::default().rewrite(generated);
    assert!(rewritten.contains("bf.model_name = m.model_name"));

    let mut tx = store.begin().await.expect("begin");
    let row = tx
        .first_row(&rewritten, Duration::from_secs(5))
        .await
        .expect("rewritten query runs")
        .expect("seeded row");

    assert_eq!(row.description(), Some("Low system water pressure"));
    assert_eq!(
        row.get("pdf_url").and_then(|value| value.as_str()),
        Some("https://manuals.boilerbrain.local/ideal/logic-combi-30.pdf")
    );
}

#[tokio::test]
async fn seeded_store_exposes_every_allow_listed_table() {
    let store = seeded_store().await;
    let mut names = store.table_names(&included_tables()).await.expect("table names");
    let mut expected = included_tables();
    names.sort();
    expected.sort();
    assert_eq!(names, expected);

    let info = store.table_info(&included_tables(), 3).await.expect("table info");
    assert!(info.contains("3 rows from boiler_fault_codes table:"));
    assert!(!info.contains("CREATE TABLE chat_sessions"));
    assert!(store.history(&SessionId::parse("nobody").expect("id")).await.expect("read").is_none());
}
