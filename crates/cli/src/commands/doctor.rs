use boilerbrain_agent::prompt::PromptBuilder;
use boilerbrain_core::config::{AppConfig, LlmProvider, LoadOptions};
use boilerbrain_db::{DiagnosticStore, SqlDiagnosticStore};
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::{open_database, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.extend(check_database(&config));
            checks.push(check_reasoning_provider(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.push(DoctorCheck::skipped("database_connectivity"));
            checks.push(DoctorCheck::skipped("knowledge_tables"));
            checks.push(DoctorCheck::skipped("reasoning_provider"));
        }
    }
    checks.push(check_prompt_template());

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Connectivity and the visible knowledge tables, in that order.
fn check_database(config: &AppConfig) -> [DoctorCheck; 2] {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return [
                DoctorCheck::fail(
                    "database_connectivity",
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::fail("knowledge_tables", "no runtime to inspect tables with"),
            ];
        }
    };

    let result = runtime.block_on(async {
        let pool = open_database(config)
            .await
            .map_err(|(_, message, _)| format!("failed to open database: {message}"))?;
        let tables = SqlDiagnosticStore::new(pool.clone())
            .table_names(&config.diagnostics.included_tables)
            .await
            .map_err(|error| error.to_string());
        pool.close().await;
        Ok::<_, String>(tables)
    });

    match result {
        Ok(tables) => [
            DoctorCheck::pass(
                "database_connectivity",
                format!("connected using `{}`", config.database.url),
            ),
            knowledge_tables_check(tables, &config.diagnostics.included_tables),
        ],
        Err(error) => [
            DoctorCheck::fail("database_connectivity", error),
            DoctorCheck::fail("knowledge_tables", "database unavailable"),
        ],
    }
}

fn knowledge_tables_check(
    tables: Result<Vec<String>, String>,
    configured: &[String],
) -> DoctorCheck {
    match tables {
        Ok(tables) if tables.is_empty() => DoctorCheck::fail(
            "knowledge_tables",
            format!("none of the {} configured tables exist", configured.len()),
        ),
        Ok(tables) => DoctorCheck::pass(
            "knowledge_tables",
            format!("{} of {} configured tables present", tables.len(), configured.len()),
        ),
        Err(error) => DoctorCheck::fail("knowledge_tables", error),
    }
}

fn check_reasoning_provider(config: &AppConfig) -> DoctorCheck {
    let needs_key = matches!(config.llm.provider, LlmProvider::OpenAi | LlmProvider::Anthropic);
    let has_key = config
        .llm
        .api_key
        .as_ref()
        .is_some_and(|key| !key.expose_secret().trim().is_empty());

    if needs_key && !has_key {
        return DoctorCheck::fail(
            "reasoning_provider",
            format!("{} requires llm.api_key", config.llm.provider.as_str()),
        );
    }

    DoctorCheck::pass(
        "reasoning_provider",
        format!("{} model `{}`", config.llm.provider.as_str(), config.llm.model),
    )
}

fn check_prompt_template() -> DoctorCheck {
    match PromptBuilder::new() {
        Ok(_) => DoctorCheck::pass("prompt_template", "diagnostic prompt template compiled"),
        Err(error) => DoctorCheck::fail("prompt_template", error.to_string()),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
