use boilerbrain_db::{DiagnosticStore, SqlDiagnosticStore};
use serde_json::json;

use crate::commands::{load_config, open_database, runtime, CommandResult};

/// Lists the knowledge tables the reasoning model is allowed to see.
pub fn run() -> CommandResult {
    let config = match load_config("tables") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("tables") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let store = SqlDiagnosticStore::new(pool.clone());
        let tables = store
            .table_names(&config.diagnostics.included_tables)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8));
        pool.close().await;
        tables
    });

    match result {
        Ok(tables) => CommandResult::success_with_data(
            "tables",
            format!("{} knowledge tables visible to the reasoning model", tables.len()),
            Some(json!({ "tables": tables })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("tables", error_class, message, exit_code)
        }
    }
}
