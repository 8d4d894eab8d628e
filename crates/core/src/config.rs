use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rewrite::{default_rewrite_rules, QueryRewriter, RewriteRule};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub diagnostics: DiagnosticsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

/// Knobs for the structured store surface exposed to the reasoning model.
#[derive(Clone, Debug)]
pub struct DiagnosticsConfig {
    /// Tables the model may see and query. Everything else is invisible to it.
    pub included_tables: Vec<String>,
    pub sample_rows_in_table_info: u32,
    pub query_timeout_secs: u64,
    pub rewrite_rules: Vec<RewriteRule>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai", alias = "open_ai")]
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_INCLUDED_TABLES: &[&str] = &[
    "boiler_manuals",
    "boiler_fault_codes",
    "boiler_components",
    "diagnostic_symptoms",
    "diagnostic_procedures",
    "symptom_fault_relationships",
    "knowledge_base",
    "boiler_models",
    "repair_histories",
];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://boilerbrain.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: None,
                model: "llama3.1".to_string(),
                temperature: 0.0,
                timeout_secs: 60,
                max_retries: 2,
                retry_base_delay_ms: 500,
            },
            diagnostics: DiagnosticsConfig {
                included_tables: DEFAULT_INCLUDED_TABLES.iter().map(|t| t.to_string()).collect(),
                sample_rows_in_table_info: 3,
                query_timeout_secs: 10,
                rewrite_rules: default_rewrite_rules(),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 3205,
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("boilerbrain.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(retry_base_delay_ms) = llm.retry_base_delay_ms {
                self.llm.retry_base_delay_ms = retry_base_delay_ms;
            }
        }

        if let Some(diagnostics) = patch.diagnostics {
            if let Some(included_tables) = diagnostics.included_tables {
                self.diagnostics.included_tables = included_tables;
            }
            if let Some(sample_rows) = diagnostics.sample_rows_in_table_info {
                self.diagnostics.sample_rows_in_table_info = sample_rows;
            }
            if let Some(query_timeout_secs) = diagnostics.query_timeout_secs {
                self.diagnostics.query_timeout_secs = query_timeout_secs;
            }
            if let Some(rewrite_rules) = diagnostics.rewrite_rules {
                self.diagnostics.rewrite_rules = rewrite_rules;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("BOILERBRAIN_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("BOILERBRAIN_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("BOILERBRAIN_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("BOILERBRAIN_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("BOILERBRAIN_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("BOILERBRAIN_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("BOILERBRAIN_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("BOILERBRAIN_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("BOILERBRAIN_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("BOILERBRAIN_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("BOILERBRAIN_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("BOILERBRAIN_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("BOILERBRAIN_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("BOILERBRAIN_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("BOILERBRAIN_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("BOILERBRAIN_LLM_RETRY_BASE_DELAY_MS") {
            self.llm.retry_base_delay_ms =
                parse_u64("BOILERBRAIN_LLM_RETRY_BASE_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("BOILERBRAIN_DIAGNOSTICS_INCLUDED_TABLES") {
            self.diagnostics.included_tables = value
                .split(',')
                .map(str::trim)
                .filter(|table| !table.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = read_env("BOILERBRAIN_DIAGNOSTICS_SAMPLE_ROWS") {
            self.diagnostics.sample_rows_in_table_info =
                parse_u32("BOILERBRAIN_DIAGNOSTICS_SAMPLE_ROWS", &value)?;
        }
        if let Some(value) = read_env("BOILERBRAIN_DIAGNOSTICS_QUERY_TIMEOUT_SECS") {
            self.diagnostics.query_timeout_secs =
                parse_u64("BOILERBRAIN_DIAGNOSTICS_QUERY_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("BOILERBRAIN_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("BOILERBRAIN_SERVER_PORT").or_else(|| read_env("PORT")) {
            self.server.port = parse_u16("BOILERBRAIN_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("BOILERBRAIN_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("BOILERBRAIN_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("BOILERBRAIN_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("BOILERBRAIN_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("BOILERBRAIN_LOGGING_LEVEL").or_else(|| read_env("BOILERBRAIN_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("BOILERBRAIN_LOGGING_FORMAT").or_else(|| read_env("BOILERBRAIN_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_diagnostics(&self.diagnostics)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("boilerbrain.toml"), PathBuf::from("config/boilerbrain.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_retries > 10 {
        return Err(ConfigError::Validation("llm.max_retries must be at most 10".to_string()));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if matches!(llm.provider, LlmProvider::OpenAi | LlmProvider::Anthropic) {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required for openai/anthropic providers".to_string(),
            ));
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_diagnostics(diagnostics: &DiagnosticsConfig) -> Result<(), ConfigError> {
    if diagnostics.included_tables.is_empty() {
        return Err(ConfigError::Validation(
            "diagnostics.included_tables must list at least one table".to_string(),
        ));
    }

    for (index, table) in diagnostics.included_tables.iter().enumerate() {
        let valid_identifier = !table.is_empty()
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !table.starts_with(|c: char| c.is_ascii_digit());
        if !valid_identifier {
            return Err(ConfigError::Validation(format!(
                "diagnostics.included_tables entry `{table}` is not a plain table identifier"
            )));
        }
        if diagnostics.included_tables[..index].contains(table) {
            return Err(ConfigError::Validation(format!(
                "diagnostics.included_tables lists `{table}` more than once"
            )));
        }
    }

    if diagnostics.query_timeout_secs == 0 || diagnostics.query_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "diagnostics.query_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    QueryRewriter::new(diagnostics.rewrite_rules.clone()).map_err(ConfigError::Validation)?;

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.port == server.health_check_port {
        return Err(ConfigError::Validation(
            "server.port and server.health_check_port must differ".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    diagnostics: Option<DiagnosticsPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DiagnosticsPatch {
    included_tables: Option<Vec<String>>,
    sample_rows_in_table_info: Option<u32>,
    query_timeout_secs: Option<u64>,
    rewrite_rules: Option<Vec<RewriteRule>>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
