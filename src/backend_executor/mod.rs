//! Backend execution module
//!
//! Talks to an OpenAI-compatible chat completion API (or Azure OpenAI) and
//! resends requests that failed in transport. The reply text is handed back
//! as-is.
//!
//! # Example
//!
//! ```ignore
//! use crate::backend_executor::{BackendExecutor, BackendRequest, create_executor};
//!
//! let backend = create_executor(&config.backend)?;
//! let request = BackendRequest::new("Fix this bug in calc.py");
//! let response = backend.execute(&request).await?;
//!
//! println!("Output: {}", response.text);
//! ```

mod http_backend;
mod retry;
mod types;

pub use types::{BackendError, BackendExecutor, BackendRequest, ChatMessage};

#[cfg(test)]
pub use types::{BackendResponse, Role};

use http_backend::HttpBackend;
use retry::TransportRetry;
use types::RetryPolicy;

use crate::config::BackendConfig;

/// Name reported by the configured backend
pub const BACKEND_NAME: &str = "chat";

/// Create the HTTP executor for a backend config, wrapped with transport retry
pub fn create_executor(config: &BackendConfig) -> Result<TransportRetry<HttpBackend>, BackendError> {
    let backend = HttpBackend::from_config(BACKEND_NAME, config)?;
    let policy = RetryPolicy::from_config(config);
    Ok(TransportRetry::new(backend, policy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_create_executor() {
        let config = BackendConfig {
            url: "https://api.openai.com/v1".into(),
            max_retries: 4,
            ..Default::default()
        };

        let executor = create_executor(&config).unwrap();
        assert_eq!(executor.name(), BACKEND_NAME);

        let config = BackendConfig {
            url: "https://acme.openai.azure.com".into(),
            api_version: Some("2024-06-01".into()),
            ..Default::default()
        };
        assert!(matches!(
            create_executor(&config),
            Err(BackendError::Config { .. })
        ));
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("timeout"));

        let err = BackendError::rate_limit(Some(Duration::from_secs(60)));
        assert!(err.to_string().contains("rate limit"));

        let err = BackendError::auth("bad key");
        assert!(err.to_string().contains("bad key"));
    }
}
