//! Completion Provider client.
//!
//! [`CompletionProvider`] is the seam between the relay and the hosted
//! language model. [`CompletionClient`] implements it for any
//! OpenAI-compatible `/chat/completions` endpoint; tests plug in scripted
//! providers instead.
//!
//! - [`retry`]: backoff for the opening request. Fragments are never
//!   replayed once yielded.
//! - [`streaming`]: provider-side SSE decoding into a [`TokenStream`].

pub mod retry;
pub mod streaming;

pub use retry::RetryConfig;

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{API_KEY_ENV, DEFAULT_MODEL, GROQ_BASE_URL, Message};

/// Lazy, finite, non-restartable sequence of text fragments.
///
/// Fragments may be empty; consumers skip those. The sequence ends after the
/// provider signals completion, or with exactly one `Err` item.
pub type TokenStream = BoxStream<'static, Result<String, ProviderError>>;

/// Result of [`CompletionProvider::complete`].
pub enum Completion {
    /// Buffered mode: the assembled completion text.
    Text(String),
    /// Streaming mode: fragments as they arrive.
    Stream(TokenStream),
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completion::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Completion::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Authentication,
    RateLimited,
    InvalidRequest,
    Timeout,
    Transport,
    Unavailable,
    /// The provider answered, but not in the shape we expect.
    Protocol,
}

/// A failure reported by (or while talking to) the completion provider.
///
/// `Display` yields only the message; it is what the relay forwards to the
/// browser in its terminal error event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Authentication, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimited, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidRequest, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transport, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unavailable, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Protocol, message)
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::RateLimited
                | ProviderErrorKind::Timeout
                | ProviderErrorKind::Transport
                | ProviderErrorKind::Unavailable
        )
    }

    /// Classify a non-success HTTP response from the provider.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = extract_error_message(body)
            .unwrap_or_else(|| format!("completion API HTTP {status}: {body}"));
        match status {
            401 | 403 => Self::authentication(message),
            429 => Self::rate_limited(message),
            400 | 422 => Self::invalid_request(message),
            408 | 504 => Self::timeout(message),
            502 | 503 => Self::unavailable(message),
            _ => Self::transport(message),
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else {
            Self::transport(err.to_string())
        }
    }
}

/// Pull a human-readable message out of an API error body.
///
/// Accepts both `{"error": {"message": "..."}}` and `{"error": "..."}`.
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    error_message_from_value(value.get("error")?)
}

pub(crate) fn error_message_from_value(error: &serde_json::Value) -> Option<String> {
    match error {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string),
        _ => None,
    }
}

// ── Provider seam ──────────────────────────────────────────────────

/// A hosted completion service.
///
/// Implementations must surface every transport or provider failure as an
/// `Err`: either from the returned future, or as the final item of the
/// token stream. Output is never silently truncated.
pub trait CompletionProvider: Send + Sync {
    /// Issue one buffered request and return the assembled text.
    fn complete_text<'a>(
        &'a self,
        messages: &'a [Message],
    ) -> BoxFuture<'a, Result<String, ProviderError>>;

    /// Issue one streaming request and return its fragments.
    fn complete_stream<'a>(
        &'a self,
        messages: &'a [Message],
    ) -> BoxFuture<'a, Result<TokenStream, ProviderError>>;

    /// Dispatch on `stream`, returning either the full text or the fragments.
    fn complete<'a>(
        &'a self,
        messages: &'a [Message],
        stream: bool,
    ) -> BoxFuture<'a, Result<Completion, ProviderError>> {
        Box::pin(async move {
            if stream {
                self.complete_stream(messages).await.map(Completion::Stream)
            } else {
                self.complete_text(messages).await.map(Completion::Text)
            }
        })
    }
}

// ── HTTP client ────────────────────────────────────────────────────

/// Settings for [`CompletionClient`].
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API base URL, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Bearer credential.
    pub api_key: String,
    /// Optional sampling temperature. `None` leaves the provider default.
    pub temperature: Option<f32>,
    /// Retry policy for the opening request.
    pub retry: RetryConfig,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Maximum silence between two reads of a response body.
    pub read_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: GROQ_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: String::new(),
            temperature: None,
            retry: RetryConfig::default(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
        }
    }
}

/// Request body for `/chat/completions`.
#[derive(Serialize, Debug)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// Buffered API response (internal deserialization target).
#[derive(Deserialize, Debug)]
struct RawCompletion {
    choices: Option<Vec<RawChoice>>,
    error: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: Option<RawMessage>,
}

#[derive(Deserialize, Debug)]
struct RawMessage {
    content: Option<String>,
}

/// Async HTTP client for an OpenAI-compatible completion API.
pub struct CompletionClient {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl CompletionClient {
    /// Create a client for the default endpoint and model.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(ProviderConfig {
            api_key: api_key.into(),
            ..Default::default()
        })
    }

    /// Create a client reading the key from the `GROQ_API_KEY` variable.
    pub fn from_env() -> Result<Self, ProviderError> {
        let key = std::env::var(API_KEY_ENV)
            .map_err(|_| ProviderError::authentication(format!("{API_KEY_ENV} not set")))?;
        Self::new(key)
    }

    pub fn with_config(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("zams-rs/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(|e| ProviderError::transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Send one request and return the response once its status is known
    /// to be a success.
    async fn post(
        &self,
        messages: &[Message],
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let body = CompletionRequest {
            model: &self.config.model,
            messages,
            stream,
            temperature: self.config.temperature,
        };

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }
        Ok(resp)
    }

    /// [`post`](Self::post) under the configured retry policy.
    async fn post_with_retry(
        &self,
        messages: &[Message],
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        retry::with_backoff(&self.config.retry, move || self.post(messages, stream)).await
    }
}

impl CompletionProvider for CompletionClient {
    fn complete_text<'a>(
        &'a self,
        messages: &'a [Message],
    ) -> BoxFuture<'a, Result<String, ProviderError>> {
        Box::pin(async move {
            debug!(
                "Completion request: model={}, messages={}",
                self.config.model,
                messages.len()
            );
            let start = Instant::now();

            let resp = self.post_with_retry(messages, false).await?;
            let text = resp.text().await.map_err(ProviderError::from_reqwest)?;
            debug!(
                "Completion response in {:.1}s ({} bytes)",
                start.elapsed().as_secs_f64(),
                text.len()
            );

            let parsed: RawCompletion = serde_json::from_str(&text)
                .map_err(|e| ProviderError::protocol(format!("failed to parse response: {e}")))?;
            if let Some(err) = parsed.error.as_ref().and_then(error_message_from_value) {
                return Err(ProviderError::protocol(err));
            }

            let content = parsed
                .choices
                .and_then(|c| c.into_iter().next())
                .and_then(|c| c.message)
                .and_then(|m| m.content)
                .unwrap_or_default();
            trace!("Completion output: {} chars", content.len());
            Ok(content)
        })
    }

    fn complete_stream<'a>(
        &'a self,
        messages: &'a [Message],
    ) -> BoxFuture<'a, Result<TokenStream, ProviderError>> {
        Box::pin(async move {
            debug!(
                "Streaming completion request: model={}, messages={}",
                self.config.model,
                messages.len()
            );
            let resp = self.post_with_retry(messages, true).await?;
            Ok(streaming::token_stream(resp))
        })
    }
}
