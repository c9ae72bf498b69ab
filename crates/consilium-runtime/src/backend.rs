//! Model backend abstraction.
//!
//! A backend is anything that turns chat messages into text: a hosted
//! model, a local model, or a scripted mock. Adapting a vendor SDK's
//! response shape happens once, inside the backend, so the rest of the
//! runtime only ever sees [`BackendResponse::text`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::limiter::provider_for;

/// Errors from model backends.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Transport failed: {0}")]
    Transport(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Transport(_) | BackendError::RateLimited { .. } => true,
            BackendError::Timeout(_) => true,
            BackendError::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            BackendError::Other(_) => false,
        }
    }

    /// Minimum wait the provider asked for before the next call.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// A chat message sent to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant"
    pub role: String,

    /// Message content
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Token usage reported by a backend, when it reports any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Response from a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse {
    pub content: String,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub usage: TokenUsage,
}

impl BackendResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: None,
            usage: TokenUsage::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    /// The generated text.
    pub fn text(&self) -> &str {
        &self.content
    }
}

/// One unit of work for a fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRequest {
    /// Backend identifier, e.g. `"anthropic/claude-sonnet"`
    pub backend_id: String,

    /// Provider whose rate budget this request draws on
    pub provider_id: String,

    pub messages: Vec<ChatMessage>,
}

impl BackendRequest {
    /// Request with the provider derived from the backend id.
    pub fn new(backend_id: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        let backend_id = backend_id.into();
        Self {
            provider_id: provider_for(&backend_id),
            backend_id,
            messages,
        }
    }

    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = provider_id.into();
        self
    }
}

/// Backend abstraction allows swapping model hosts.
///
/// Implementations must be cancel-safe: the runtime drops the returned
/// future on timeout or cancellation.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Identifier requests use to address this backend.
    fn id(&self) -> &str;

    /// Run one completion.
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<BackendResponse, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_creation() {
        assert_eq!(ChatMessage::system("rules").role, "system");
        assert_eq!(ChatMessage::user("hi").role, "user");
        assert_eq!(ChatMessage::assistant("hello").role, "assistant");
    }

    #[test]
    fn test_request_derives_provider() {
        let request = BackendRequest::new("openai/gpt-4o", vec![ChatMessage::user("hi")]);
        assert_eq!(request.provider_id, "openai");

        let routed = request.with_provider("azure");
        assert_eq!(routed.provider_id, "azure");
        assert_eq!(routed.backend_id, "openai/gpt-4o");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(BackendError::Transport("reset".into()).is_retryable());
        assert!(BackendError::RateLimited { retry_after: None }.is_retryable());
        assert!(BackendError::Api {
            status: 503,
            message: "overloaded".into()
        }
        .is_retryable());
        assert!(!BackendError::Api {
            status: 400,
            message: "bad request".into()
        }
        .is_retryable());
        assert!(!BackendError::Other("refused".into()).is_retryable());
    }

    #[test]
    fn test_retry_after_only_from_rate_limits() {
        let limited = BackendError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(BackendError::Transport("reset".into()).retry_after(), None);
    }

    #[test]
    fn test_response_text() {
        let response = BackendResponse::new("{\"scores\": {}}").with_model("gpt-4o");
        assert_eq!(response.text(), "{\"scores\": {}}");
        assert_eq!(response.model.as_deref(), Some("gpt-4o"));
    }
}
