use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use boilerbrain_core::config::AppConfig;
use toml::Value;

use crate::commands::{load_config, CommandResult};

/// Effective configuration, one line per key, with where each value came from.
pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(result) => return result,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, env_keys, value) in effective_values(&config) {
        let source =
            field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

type ConfigLine = (&'static str, &'static [&'static str], String);

fn effective_values(config: &AppConfig) -> Vec<ConfigLine> {
    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        line("database.url", &["BOILERBRAIN_DATABASE_URL"], config.database.url.clone()),
        line(
            "database.max_connections",
            &["BOILERBRAIN_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        line(
            "database.timeout_secs",
            &["BOILERBRAIN_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        line("llm.provider", &["BOILERBRAIN_LLM_PROVIDER"], config.llm.provider.as_str().to_string()),
        line("llm.model", &["BOILERBRAIN_LLM_MODEL"], config.llm.model.clone()),
        line(
            "llm.base_url",
            &["BOILERBRAIN_LLM_BASE_URL"],
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        line("llm.api_key", &["BOILERBRAIN_LLM_API_KEY"], api_key.to_string()),
        line("llm.temperature", &["BOILERBRAIN_LLM_TEMPERATURE"], config.llm.temperature.to_string()),
        line("llm.timeout_secs", &["BOILERBRAIN_LLM_TIMEOUT_SECS"], config.llm.timeout_secs.to_string()),
        line("llm.max_retries", &["BOILERBRAIN_LLM_MAX_RETRIES"], config.llm.max_retries.to_string()),
        line(
            "diagnostics.included_tables",
            &["BOILERBRAIN_DIAGNOSTICS_INCLUDED_TABLES"],
            config.diagnostics.included_tables.join(","),
        ),
        line(
            "diagnostics.sample_rows_in_table_info",
            &["BOILERBRAIN_DIAGNOSTICS_SAMPLE_ROWS"],
            config.diagnostics.sample_rows_in_table_info.to_string(),
        ),
        line(
            "diagnostics.query_timeout_secs",
            &["BOILERBRAIN_DIAGNOSTICS_QUERY_TIMEOUT_SECS"],
            config.diagnostics.query_timeout_secs.to_string(),
        ),
        line(
            "diagnostics.rewrite_rules",
            &[],
            format!("{} rules", config.diagnostics.rewrite_rules.len()),
        ),
        line(
            "server.bind_address",
            &["BOILERBRAIN_SERVER_BIND_ADDRESS"],
            config.server.bind_address.clone(),
        ),
        line("server.port", &["BOILERBRAIN_SERVER_PORT", "PORT"], config.server.port.to_string()),
        line(
            "server.health_check_port",
            &["BOILERBRAIN_SERVER_HEALTH_CHECK_PORT"],
            config.server.health_check_port.to_string(),
        ),
        line(
            "logging.level",
            &["BOILERBRAIN_LOGGING_LEVEL", "BOILERBRAIN_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        line(
            "logging.format",
            &["BOILERBRAIN_LOGGING_FORMAT", "BOILERBRAIN_LOG_FORMAT"],
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
        ),
    ]
}

fn line(key_path: &'static str, env_keys: &'static [&'static str], value: String) -> ConfigLine {
    (key_path, env_keys, value)
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("boilerbrain.toml"), PathBuf::from("config/boilerbrain.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if config_file_doc.is_some_and(|doc| contains_path(doc, key_path)) {
        let file_path = config_file_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use boilerbrain_core::config::AppConfig;
    use toml::Value;

    use super::{contains_path, effective_values};

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc: Value = "[diagnostics]\nquery_timeout_secs = 4\n".parse().expect("toml");
        assert!(contains_path(&doc, "diagnostics.query_timeout_secs"));
        assert!(!contains_path(&doc, "diagnostics.included_tables"));
        assert!(!contains_path(&doc, "llm.model"));
    }

    #[test]
    fn api_key_is_never_printed() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-very-secret".to_string().into());

        let values = effective_values(&config);
        let (_, _, api_key) =
            values.iter().find(|(key, _, _)| *key == "llm.api_key").expect("api key line");
        assert_eq!(api_key, "<redacted>");
        assert!(values.iter().all(|(_, _, value)| !value.contains("sk-very-secret")));
    }
}
