//! Language model boundary
//!
//! Classification and the analysis handlers only see [`LanguageModel`]. The
//! model's output is untrusted free text; callers parse it defensively.
//! [`HttpModel`] talks to any OpenAI-compatible chat completions endpoint
//! (Gemini's included).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// What a request is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Classify,
    ClauseSearch,
    ComplianceCheck,
    Summary,
    RiskAssessment,
    General,
}

/// One model invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub task: TaskKind,
    /// System instruction
    pub system: String,
    /// Complete user turn: framing, document excerpt and query
    pub prompt: String,
    /// The user's query as submitted
    pub query: String,
    /// The document excerpt embedded in the prompt, if any
    pub document_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("model request timed out")]
    Timeout,
    #[error("model transport error: {0}")]
    Transport(String),
    #[error("model quota exceeded: {0}")]
    Quota(String),
    #[error("model authentication failed: {0}")]
    Auth(String),
    #[error("model service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed model output: {0}")]
    Malformed(String),
    #[error("model configuration error: {0}")]
    Configuration(String),
}

impl ModelError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Timeout | ModelError::Transport(_) => true,
            ModelError::Status { status, .. } => *status >= 500,
            ModelError::Quota(_)
            | ModelError::Auth(_)
            | ModelError::Malformed(_)
            | ModelError::Configuration(_) => false,
        }
    }
}

/// A text completion service
pub trait LanguageModel {
    fn complete(&self, request: &ModelRequest) -> Result<String, ModelError>;
}

impl<T: LanguageModel + ?Sized> LanguageModel for &T {
    fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        (**self).complete(request)
    }
}

impl<T: LanguageModel + ?Sized> LanguageModel for Box<T> {
    fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        (**self).complete(request)
    }
}

impl<T: LanguageModel + ?Sized> LanguageModel for Arc<T> {
    fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        (**self).complete(request)
    }
}

/// Bounded retry for transient model failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn complete<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &ModelRequest,
    ) -> Result<String, ModelError> {
        let mut delay = self.backoff;
        let mut attempt = 0;

        loop {
            match model.complete(request) {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    log::warn!(
                        "{:?} request failed ({}), retry {}/{}",
                        request.task,
                        e,
                        attempt,
                        self.max_retries
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                        delay *= 2;
                    }
                }
                result => return result,
            }
        }
    }
}

/// Connection settings for [`HttpModel`]
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`)
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl ModelConfig {
    pub const DEFAULT_BASE_URL: &'static str =
        "https://generativelanguage.googleapis.com/v1beta/openai";
    pub const DEFAULT_MODEL: &'static str = "gemini-2.5-flash";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            temperature: 0.1,
            max_tokens: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Read settings from the environment
    ///
    /// `LEGAL_REVIEW_API_KEY` (or `GOOGLE_API_KEY`) is required;
    /// `LEGAL_REVIEW_BASE_URL`, `LEGAL_REVIEW_MODEL` and
    /// `LEGAL_REVIEW_TIMEOUT_SECS` override the defaults.
    pub fn from_env() -> Result<Self, ModelError> {
        let api_key = std::env::var("LEGAL_REVIEW_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .map_err(|_| {
                ModelError::Configuration(
                    "set LEGAL_REVIEW_API_KEY or GOOGLE_API_KEY".to_string(),
                )
            })?;

        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("LEGAL_REVIEW_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(model) = std::env::var("LEGAL_REVIEW_MODEL") {
            config.model = model;
        }
        if let Ok(secs) = std::env::var("LEGAL_REVIEW_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                ModelError::Configuration(format!("invalid LEGAL_REVIEW_TIMEOUT_SECS: {}", secs))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// [`LanguageModel`] over an OpenAI-compatible chat completions API
#[derive(Debug)]
pub struct HttpModel {
    client: reqwest::blocking::Client,
    config: ModelConfig,
}

impl HttpModel {
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ModelError::Configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

impl LanguageModel for HttpModel {
    fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        log::debug!("{:?} request to {} ({})", request.task, url, self.config.model);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout
                } else {
                    ModelError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(status_error(status.as_u16(), message));
        }

        let parsed: ChatResponse = response.json().map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout
            } else {
                ModelError::Malformed(format!("failed to parse response: {}", e))
            }
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ModelError::Malformed("response has no message content".to_string()))
    }
}

fn status_error(status: u16, message: String) -> ModelError {
    match status {
        429 => ModelError::Quota(message),
        401 | 403 => ModelError::Auth(message),
        _ => ModelError::Status { status, message },
    }
}
