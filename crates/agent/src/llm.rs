//! Reasoning capability clients.
//!
//! The orchestrator only ever sees [`LlmClient`]: one prompt in, one blob of
//! text out. [`HttpLlmClient`] speaks to the configured provider and
//! [`ResilientLlmClient`] adds the per-attempt timeout and bounded retry.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use boilerbrain_core::config::{LlmConfig, LlmProvider};
use boilerbrain_core::errors::DiagnosticError;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 1024;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("provider response could not be decoded: {0}")]
    Decode(String),
    #[error("no answer within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    #[error("client misconfigured: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Rate limiting, server faults, dropped connections and timeouts are
    /// worth another attempt. Other client errors will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::Configuration(_) => false,
        }
    }
}

impl From<LlmError> for DiagnosticError {
    fn from(error: LlmError) -> Self {
        match error {
            LlmError::Timeout { timeout_secs } => DiagnosticError::ReasoningTimeout { timeout_secs },
            other => DiagnosticError::Reasoning(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[async_trait]
impl<T> LlmClient for std::sync::Arc<T>
where
    T: LlmClient + ?Sized,
{
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        (**self).complete(prompt).await
    }
}

pub struct HttpLlmClient {
    http: reqwest::Client,
    provider: LlmProvider,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    temperature: f32,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs.clamp(1, 10)))
            .build()
            .map_err(|error| LlmError::Configuration(error.to_string()))?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(config.provider).to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http,
            provider: config.provider,
            base_url,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn endpoint(&self) -> String {
        match self.provider {
            LlmProvider::OpenAi => format!("{}/chat/completions", self.base_url),
            LlmProvider::Anthropic => format!("{}/messages", self.base_url),
            LlmProvider::Ollama => format!("{}/api/generate", self.base_url),
        }
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        match self.provider {
            LlmProvider::OpenAi => serde_json::json!({
                "model": &self.model,
                "messages": [{"role": "user", "content": prompt}],
                "temperature": self.temperature,
            }),
            LlmProvider::Anthropic => serde_json::json!({
                "model": &self.model,
                "max_tokens": ANTHROPIC_MAX_TOKENS,
                "temperature": self.temperature,
                "messages": [{"role": "user", "content": prompt}],
            }),
            LlmProvider::Ollama => serde_json::json!({
                "model": &self.model,
                "prompt": prompt,
                "stream": false,
                "options": {"temperature": self.temperature},
            }),
        }
    }

    fn api_key(&self) -> Result<&str, LlmError> {
        self.api_key.as_ref().map(|key| key.expose_secret()).ok_or_else(|| {
            LlmError::Configuration(format!("{:?} requires an api key", self.provider))
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let mut request = self.http.post(self.endpoint()).json(&self.request_body(prompt));
        request = match self.provider {
            LlmProvider::OpenAi => request.bearer_auth(self.api_key()?),
            LlmProvider::Anthropic => request
                .header("x-api-key", self.api_key()?)
                .header("anthropic-version", ANTHROPIC_VERSION),
            LlmProvider::Ollama => request,
        };

        debug!(provider = ?self.provider, model = %self.model, "calling reasoning provider");
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Http { status: status.as_u16(), body });
        }

        extract_completion(self.provider, &body)
    }
}

pub fn default_base_url(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => OPENAI_BASE_URL,
        LlmProvider::Anthropic => ANTHROPIC_BASE_URL,
        LlmProvider::Ollama => OLLAMA_BASE_URL,
    }
}

/// Pulls the generated text out of a provider's response body.
pub fn extract_completion(provider: LlmProvider, body: &str) -> Result<String, LlmError> {
    #[derive(Deserialize)]
    struct OpenAiMessage {
        content: Option<String>,
    }
    #[derive(Deserialize)]
    struct OpenAiChoice {
        message: OpenAiMessage,
    }
    #[derive(Deserialize)]
    struct OpenAiResponse {
        choices: Vec<OpenAiChoice>,
    }

    #[derive(Deserialize)]
    struct AnthropicBlock {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        text: String,
    }
    #[derive(Deserialize)]
    struct AnthropicResponse {
        content: Vec<AnthropicBlock>,
    }

    #[derive(Deserialize)]
    struct OllamaResponse {
        response: String,
    }

    let decode = |error: serde_json::Error| LlmError::Decode(error.to_string());
    match provider {
        LlmProvider::OpenAi => {
            let parsed: OpenAiResponse = serde_json::from_str(body).map_err(decode)?;
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| LlmError::Decode("response carried no choices".to_string()))
        }
        LlmProvider::Anthropic => {
            let parsed: AnthropicResponse = serde_json::from_str(body).map_err(decode)?;
            let text = parsed
                .content
                .into_iter()
                .filter(|block| block.kind == "text")
                .map(|block| block.text)
                .collect::<Vec<_>>();
            if text.is_empty() {
                return Err(LlmError::Decode("response carried no text blocks".to_string()));
            }
            Ok(text.join(""))
        }
        LlmProvider::Ollama => {
            let parsed: OllamaResponse = serde_json::from_str(body).map_err(decode)?;
            Ok(parsed.response)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Exponential delay before retry number `attempt + 1`, plus up to half the
    /// base delay of jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ceiling = u64::try_from(self.base_delay.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter = if jitter_ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ceiling)
        };
        exponential.saturating_add(Duration::from_millis(jitter)).min(MAX_BACKOFF)
    }
}

pub struct ResilientLlmClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C> ResilientLlmClient<C>
where
    C: LlmClient,
{
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<C> LlmClient for ResilientLlmClient<C>
where
    C: LlmClient,
{
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(self.policy.timeout, self.inner.complete(prompt))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(LlmError::Timeout { timeout_secs: self.policy.timeout.as_secs() }),
            };

            match outcome {
                Ok(text) => return Ok(text),
                Err(error) if error.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        event_name = "diagnostic.reasoning.retry",
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "transient reasoning failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Replays canned answers in order and records every prompt it receives.
#[derive(Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: impl IntoIterator<Item = Result<String, LlmError>>) -> Self {
        Self { responses: Mutex::new(responses.into_iter().collect()), prompts: Mutex::default() }
    }

    pub fn replying(texts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(texts.into_iter().map(|text| Ok(text.into())))
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|prompts| prompts.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let next = self.responses.lock().ok().and_then(|mut responses| responses.pop_front());
        next.unwrap_or_else(|| Err(LlmError::Transport("no scripted response left".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use boilerbrain_core::config::{AppConfig, LlmProvider};
    use boilerbrain_core::errors::DiagnosticError;

    use super::{
        extract_completion, HttpLlmClient, LlmClient, LlmError, ResilientLlmClient, RetryPolicy,
        ScriptedLlmClient,
    };

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(200),
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    struct Slow;

    #[async_trait]
    impl LlmClient for Slow {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_string())
        }
    }

    struct Counting {
        calls: AtomicU32,
        error: LlmError,
    }

    #[async_trait]
    impl LlmClient for Counting {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let scripted = ScriptedLlmClient::new([
            Err(LlmError::Http { status: 503, body: "overloaded".into() }),
            Err(LlmError::Transport("connection reset".into())),
            Ok("{\"action\":\"ask\"}".to_string()),
        ]);
        let client = ResilientLlmClient::new(scripted, policy(2));

        assert_eq!(client.complete("p").await, Ok("{\"action\":\"ask\"}".to_string()));
    }

    #[tokio::test]
    async fn client_errors_fail_without_retry() {
        let counting =
            Counting { calls: AtomicU32::new(0), error: LlmError::Http { status: 401, body: String::new() } };
        let client = ResilientLlmClient::new(counting, policy(3));

        assert!(matches!(client.complete("p").await, Err(LlmError::Http { status: 401, .. })));
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let counting = Counting {
            calls: AtomicU32::new(0),
            error: LlmError::Http { status: 429, body: "slow down".into() },
        };
        let client = ResilientLlmClient::new(counting, policy(2));

        assert!(client.complete("p").await.is_err());
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let client = ResilientLlmClient::new(Slow, policy(0));
        let error = client.complete("p").await.expect_err("must time out");

        assert!(matches!(error, LlmError::Timeout { .. }));
        assert!(matches!(DiagnosticError::from(error), DiagnosticError::ReasoningTimeout { .. }));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            max_retries: 5,
            base_delay: Duration::from_millis(100),
        };
        let first = policy.backoff(0);
        let third = policy.backoff(2);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(450));
        assert_eq!(policy.backoff(20), Duration::from_secs(30));
    }

    #[test]
    fn provider_payloads_are_decoded() {
        let openai = r#"{"choices":[{"message":{"role":"assistant","content":"{\"action\":\"ask\"}"}}]}"#;
        assert_eq!(extract_completion(LlmProvider::OpenAi, openai), Ok("{\"action\":\"ask\"}".into()));

        let anthropic = r#"{"content":[{"type":"text","text":"part one "},{"type":"text","text":"part two"}]}"#;
        assert_eq!(extract_completion(LlmProvider::Anthropic, anthropic), Ok("part one part two".into()));

        let ollama = r#"{"model":"llama3.1","response":"hello","done":true}"#;
        assert_eq!(extract_completion(LlmProvider::Ollama, ollama), Ok("hello".into()));

        assert!(matches!(
            extract_completion(LlmProvider::OpenAi, r#"{"choices":[]}"#),
            Err(LlmError::Decode(_))
        ));
    }

    #[test]
    fn endpoints_follow_provider_conventions() {
        let mut config = AppConfig::default().llm;
        config.provider = LlmProvider::Ollama;
        let ollama = HttpLlmClient::from_config(&config).expect("client");
        assert_eq!(ollama.endpoint(), "http://localhost:11434/api/generate");

        config.provider = LlmProvider::OpenAi;
        config.base_url = Some("https://gateway.local/v1/".to_string());
        let openai = HttpLlmClient::from_config(&config).expect("client");
        assert_eq!(openai.endpoint(), "https://gateway.local/v1/chat/completions");
    }

    #[tokio::test]
    async fn missing_api_key_is_a_configuration_error() {
        let mut config = AppConfig::default().llm;
        config.provider = LlmProvider::Anthropic;
        config.api_key = None;
        let client = HttpLlmClient::from_config(&config).expect("client");

        let error = client.complete("p").await.expect_err("no key");
        assert!(matches!(error, LlmError::Configuration(_)));
        assert!(!error.is_transient());
    }
}
