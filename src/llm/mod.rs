//! Chat-completion client.
//!
//! [`LlmClient`] issues a single `POST {base_url}/chat/completions` per call
//! with a bearer credential and returns the text of the first choice. There
//! is no retry at this layer. The [`ChatCompletion`] trait is the seam the
//! responder depends on, so tests can substitute a scripted provider.
//!
//! # Errors
//!
//! - [`LlmError::Transport`] — the request never produced a response
//!   (connect failure, timeout, body read failure).
//! - [`LlmError::Provider`] — non-2xx status; carries the response body.
//! - [`LlmError::Format`] — unparseable body, zero choices, or empty text.

// Rust guideline compliant 2026-02

mod types;

use std::time::Duration;

use async_trait::async_trait;

pub use types::ChatMessage;
use types::{ChatCompletionRequest, ChatCompletionResponse};

/// Failure of a chat-completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Network-level failure.
    Transport(String),
    /// The provider answered with a non-success status.
    Provider {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },
    /// The response could not be interpreted as a completion.
    Format(String),
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "LLM transport error: {msg}"),
            Self::Provider { status, body } => {
                write!(f, "LLM provider error (HTTP {status}): {body}")
            }
            Self::Format(msg) => write!(f, "LLM response format error: {msg}"),
        }
    }
}

impl std::error::Error for LlmError {}

/// Something that can turn an ordered message list into a reply.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Request one completion for `messages`.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError>;
}

/// HTTP client for an OpenAI-compatible provider.
pub struct LlmClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Create a client for `base_url` (e.g. `https://api.openai.com/v1`).
    ///
    /// `timeout` bounds each whole request.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: completions_url(base_url),
            api_key: api_key.into(),
        })
    }

    /// Full URL of the chat-completion endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatCompletion for LlmClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let request = ChatCompletionRequest {
            model,
            messages,
            max_tokens,
            temperature,
        };

        log::debug!(
            "[Llm] POST {} (model={}, messages={})",
            self.endpoint,
            model,
            messages.len()
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Transport(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(LlmError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        parse_completion(&body)
    }
}

/// Extract the first choice's text from a completion body.
fn parse_completion(body: &str) -> Result<String, LlmError> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Format(e.to_string()))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Format("response contained no choices".to_string()))?;

    match choice.message.content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(LlmError::Format("first choice has no content".to_string())),
    }
}

fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}
