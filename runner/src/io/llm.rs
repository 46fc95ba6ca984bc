//! Model backend client.
//!
//! Both supported providers speak the OpenAI chat-completions dialect, so a
//! single blocking client covers them. The reply's message content must itself
//! be a JSON document; schema checks happen later in
//! [`crate::core::decision::parse_decision`].

use std::fmt;
use std::thread;

use anyhow::{Result, anyhow};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::core::history::ConversationHistory;
use crate::core::truncate::tail;
use crate::io::config::RunnerConfig;
use crate::io::retry::{backoff_delay, should_retry_status};

/// Header carrying the zero-based attempt number of a request.
pub const RETRY_ATTEMPT_HEADER: &str = "x-runner-retry-attempt";

/// Bytes of an error body kept in [`LlmError::Http`].
const ERROR_BODY_TAIL: usize = 800;

const TEMPERATURE: f64 = 0.2;

/// Seam between the orchestrator and the model backend.
pub trait LlmClient: Send + Sync {
    /// Ask for the next decision given the full history.
    fn next_decision(&self, history: &ConversationHistory) -> Result<Value>;
}

/// Model failures that end the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    MissingCredentials,
    /// Non-retryable status, or retries exhausted.
    Http { status: u16, body: String },
    /// Transport failure after retries.
    Network(String),
    /// The reply was not a JSON document.
    InvalidReply(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::MissingCredentials => f.write_str("API_KEY/OPENAI_API_KEY not set"),
            LlmError::Http { status, body } => write!(f, "llm http error {status}: {body}"),
            LlmError::Network(err) => write!(f, "llm network error: {err}"),
            LlmError::InvalidReply(err) => write!(f, "llm reply is not valid JSON: {err}"),
        }
    }
}

impl std::error::Error for LlmError {}

/// Blocking client for `POST {base}/chat/completions`.
#[derive(Debug)]
pub struct OpenAiCompatClient {
    http: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: String,
    max_retries: u32,
    retry_base_delay_ms: u64,
}

impl OpenAiCompatClient {
    /// Fails with [`LlmError::MissingCredentials`] before any request is made.
    pub fn from_config(config: &RunnerConfig) -> Result<Self> {
        let api_key = config
            .api_key()
            .ok_or(LlmError::MissingCredentials)?
            .to_string();
        let http = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| anyhow!("build http client: {e}"))?;
        Ok(Self {
            http,
            url: format!("{}/chat/completions", config.endpoint_base()),
            model: config.model().to_string(),
            api_key,
            max_retries: config.max_llm_retries,
            retry_base_delay_ms: config.retry_base_delay_ms,
        })
    }

    fn request_body(&self, history: &ConversationHistory) -> Value {
        json!({
            "model": self.model,
            "messages": history.messages(),
            "response_format": {"type": "json_object"},
            "temperature": TEMPERATURE,
        })
    }

    fn back_off(&self, attempt: u32) {
        let delay = backoff_delay(self.retry_base_delay_ms, attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying model request");
        thread::sleep(delay);
    }
}

impl LlmClient for OpenAiCompatClient {
    #[instrument(skip_all, fields(model = %self.model, messages = history.len()))]
    fn next_decision(&self, history: &ConversationHistory) -> Result<Value> {
        let body = self.request_body(history);
        for attempt in 0..=self.max_retries {
            let sent = self
                .http
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .header(RETRY_ATTEMPT_HEADER, attempt.to_string())
                .json(&body)
                .send();
            let response = match sent {
                Ok(response) => response,
                Err(err) => {
                    if attempt < self.max_retries {
                        warn!(attempt, err = %err, "model request failed");
                        self.back_off(attempt);
                        continue;
                    }
                    return Err(LlmError::Network(err.to_string()).into());
                }
            };

            let status = response.status().as_u16();
            if response.status().is_success() {
                let payload: Value = response
                    .json()
                    .map_err(|e| LlmError::InvalidReply(e.to_string()))?;
                return Ok(extract_decision(&payload)?);
            }

            let text = response.text().unwrap_or_default();
            if attempt < self.max_retries && should_retry_status(status) {
                warn!(attempt, status, "transient model error");
                self.back_off(attempt);
                continue;
            }
            return Err(LlmError::Http {
                status,
                body: tail(&text, ERROR_BODY_TAIL).to_string(),
            }
            .into());
        }
        Err(anyhow!("model request retry loop ended without a result"))
    }
}

/// Pull `choices[0].message.content` out of a completion and parse it as JSON.
fn extract_decision(payload: &Value) -> Result<Value, LlmError> {
    let content = payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::InvalidReply("missing choices[0].message.content".to_string()))?;
    serde_json::from_str(content).map_err(|e| LlmError::InvalidReply(e.to_string()))
}
