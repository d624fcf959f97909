//! Core types and traits for backend execution

use crate::config::BackendConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Error types that can occur during backend execution
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Request timed out
    #[error("timeout after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Rate limited by the provider
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimit { retry_after: Option<Duration> },

    /// Authentication failed
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// Network error
    #[error("network error: {message}")]
    Network { message: String },

    /// Response body was not a chat completion
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Invalid configuration
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl BackendError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Timeout { .. }
                | BackendError::RateLimit { .. }
                | BackendError::Network { .. }
        )
    }

    /// Get suggested retry delay for rate limit errors
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout { elapsed }
    }

    pub fn rate_limit(retry_after: Option<Duration>) -> Self {
        Self::RateLimit { retry_after }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Response from a backend execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendResponse {
    /// Raw text of the assistant reply
    pub text: String,

    /// Backend name that produced this response
    pub backend: String,

    /// Model used (if known)
    pub model: Option<String>,

    /// Time taken to execute
    pub duration: Duration,

    /// Token usage (if available)
    pub usage: Option<TokenUsage>,
}

/// Token usage information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl BackendResponse {
    /// Create a new response with just text
    pub fn new(text: String, backend: String, duration: Duration) -> Self {
        Self {
            text,
            backend,
            model: None,
            duration,
            usage: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// A conversation to send to a backend
#[derive(Debug, Clone)]
pub struct BackendRequest {
    /// Full message history, oldest first
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature override
    pub temperature: Option<f32>,
}

impl BackendRequest {
    /// A single user message
    #[cfg(test)]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self::from_messages(vec![ChatMessage::user(prompt)])
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Trait for backend executors
#[async_trait]
pub trait BackendExecutor: Send + Sync {
    /// Execute a request against this backend
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError>;

    /// Get the backend name
    fn name(&self) -> &str;

    /// Check if this backend is available
    async fn is_available(&self) -> bool {
        true
    }
}

/// Implement BackendExecutor for Box<dyn BackendExecutor>
#[async_trait]
impl BackendExecutor for Box<dyn BackendExecutor> {
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        (**self).execute(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    async fn is_available(&self) -> bool {
        (**self).is_available().await
    }
}

/// Retry policy for transient transport failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries
    pub max_retries: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy from backend config
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.retry_delay_ms),
            ..Default::default()
        }
    }

    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            // Up to 25% extra
            let jitter = rand::random::<f64>() * 0.25 * capped_delay;
            capped_delay + jitter
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }
}
