//! HTTP API-based backend executor

use super::types::{
    BackendError, BackendExecutor, BackendRequest, BackendResponse, ChatMessage, TokenUsage,
};
use crate::config::BackendConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Executor for OpenAI-compatible chat completion APIs, including Azure OpenAI
#[derive(Debug, Clone)]
pub struct HttpBackend {
    /// Backend name
    name: String,

    /// Base URL for the API
    base_url: String,

    /// API key (if required)
    api_key: Option<String>,

    /// Model ID to use
    model: Option<String>,

    /// Azure deployment name
    deployment: Option<String>,

    /// Azure API version; `Some` selects Azure URLs and the `api-key` header
    api_version: Option<String>,

    /// Sampling temperature used when the request has none
    temperature: Option<f32>,

    /// Default timeout
    timeout: Duration,

    /// HTTP client
    client: reqwest::Client,
}

/// OpenAI-compatible chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// OpenAI-compatible chat completion response
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::config(format!("failed to build HTTP client: {}", e)))
}

impl HttpBackend {
    /// Create a new HTTP backend from config
    pub fn from_config(name: impl Into<String>, config: &BackendConfig) -> Result<Self, BackendError> {
        let timeout = Duration::from_secs(config.timeout);

        if config.is_azure() && config.deployment.is_none() && config.model.is_none() {
            return Err(BackendError::config(
                "azure mode needs a deployment or model name",
            ));
        }

        Ok(Self {
            name: name.into(),
            base_url: config.url.clone(),
            api_key: config.resolve_api_key(),
            model: config.model.clone(),
            deployment: config.deployment.clone(),
            api_version: config.api_version.clone(),
            temperature: Some(config.temperature),
            timeout,
            client: build_client(timeout)?,
        })
    }

    /// Build the chat completion URL
    fn chat_completion_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        match self.api_version {
            Some(ref version) => {
                let deployment = self
                    .deployment
                    .as_deref()
                    .or(self.model.as_deref())
                    .unwrap_or_default();
                format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    base, deployment, version
                )
            }
            None => format!("{}/chat/completions", base),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.api_key, &self.api_version) {
            (Some(key), Some(_)) => request.header("api-key", key),
            (Some(key), None) => request.header("Authorization", format!("Bearer {}", key)),
            (None, _) => request,
        }
    }

    /// Map HTTP status to BackendError
    fn map_http_error(&self, status: reqwest::StatusCode, body: &str) -> BackendError {
        match status.as_u16() {
            401 | 403 => BackendError::auth(format!("HTTP {}: {}", status, body)),
            429 => BackendError::rate_limit(self.parse_retry_after(body)),
            408 | 504 => BackendError::timeout(self.timeout),
            400..=499 => BackendError::config(format!("HTTP {}: {}", status, body)),
            500..=599 => BackendError::network(format!("HTTP {}: {}", status, body)),
            _ => BackendError::network(format!("unexpected HTTP {}: {}", status, body)),
        }
    }

    /// Try to parse retry-after from error response
    fn parse_retry_after(&self, body: &str) -> Option<Duration> {
        let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
        json.get("retry_after")
            .and_then(|v| v.as_f64())
            .map(Duration::from_secs_f64)
    }
}

#[async_trait]
impl BackendExecutor for HttpBackend {
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        let start = Instant::now();

        let body = ChatCompletionRequest {
            // Azure selects the model through the deployment in the URL
            model: if self.api_version.is_some() {
                None
            } else {
                Some(self.model.as_deref().unwrap_or("gpt-4o"))
            },
            messages: &request.messages,
            temperature: request.temperature.or(self.temperature),
        };

        let http_request = self.authorize(self.client.post(self.chat_completion_url()).json(&body));

        tracing::debug!(
            backend = %self.name,
            messages = request.messages.len(),
            "sending chat completion"
        );

        let result = tokio::time::timeout(self.timeout, http_request.send()).await;

        let elapsed = start.elapsed();

        match result {
            Ok(Ok(response)) => {
                let status = response.status();

                if status.is_success() {
                    let completion: ChatCompletionResponse =
                        response.json().await.map_err(|e| {
                            BackendError::parse(format!("failed to parse response: {}", e))
                        })?;

                    let text = completion
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.content)
                        .unwrap_or_default();

                    let mut backend_response =
                        BackendResponse::new(text, self.name.clone(), elapsed);

                    if let Some(model) = completion.model {
                        backend_response = backend_response.with_model(model);
                    }

                    if let Some(usage) = completion.usage {
                        backend_response = backend_response.with_usage(TokenUsage {
                            prompt_tokens: usage.prompt_tokens,
                            completion_tokens: usage.completion_tokens,
                            total_tokens: usage.total_tokens,
                        });
                    }

                    Ok(backend_response)
                } else {
                    let body = response.text().await.unwrap_or_default();
                    Err(self.map_http_error(status, &body))
                }
            }
            Ok(Err(e)) => {
                if e.is_timeout() {
                    Err(BackendError::timeout(elapsed))
                } else if e.is_connect() {
                    Err(BackendError::network(format!("connection failed: {}", e)))
                } else {
                    Err(BackendError::network(format!("request failed: {}", e)))
                }
            }
            Err(_) => Err(BackendError::timeout(elapsed)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        // Azure has no unauthenticated models listing per deployment; any answer counts
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        let request = self.authorize(self.client.get(&url));

        match tokio::time::timeout(Duration::from_secs(5), request.send()).await {
            Ok(Ok(response)) => {
                response.status().is_success() || self.api_version.is_some()
            }
            _ => false,
        }
    }
}
