//! Backend configuration for the repair model

use serde::{Deserialize, Serialize};

/// Connection settings for the language-model backend
#[derive(Debug, Clone, Serialize)]
pub struct BackendConfig {
    /// Base URL of an OpenAI-compatible API, or an Azure OpenAI endpoint
    pub url: String,

    /// API key (prefer `api_key_env` or LLM_MEND_API_KEY)
    pub api_key: Option<String>,

    /// Name of an environment variable holding the API key
    pub api_key_env: Option<String>,

    /// Model identifier sent with each request
    pub model: Option<String>,

    /// Azure deployment name (defaults to the model)
    pub deployment: Option<String>,

    /// Azure API version; setting it switches to Azure request style
    pub api_version: Option<String>,

    /// Timeout in seconds for requests
    pub timeout: u64,

    /// Maximum retry attempts for transient failures
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    pub retry_delay_ms: u64,

    /// Sampling temperature
    pub temperature: f32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com/v1".into(),
            api_key: None,
            api_key_env: None,
            model: None,
            deployment: None,
            api_version: None,
            timeout: 300, // 5 minutes
            max_retries: 3,
            retry_delay_ms: 1000,
            temperature: 0.1,
        }
    }
}

/// `[backend]` as written in one config file; unset keys leave the
/// earlier layer alone
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendLayer {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub deployment: Option<String>,
    pub api_version: Option<String>,
    pub timeout: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub temperature: Option<f32>,
}

impl BackendConfig {
    /// Overlay every key the layer sets
    pub fn apply(&mut self, layer: BackendLayer) {
        let BackendLayer {
            url,
            api_key,
            api_key_env,
            model,
            deployment,
            api_version,
            timeout,
            max_retries,
            retry_delay_ms,
            temperature,
        } = layer;

        if let Some(url) = url {
            self.url = url;
        }
        if api_key.is_some() {
            self.api_key = api_key;
        }
        if api_key_env.is_some() {
            self.api_key_env = api_key_env;
        }
        if model.is_some() {
            self.model = model;
        }
        if deployment.is_some() {
            self.deployment = deployment;
        }
        if api_version.is_some() {
            self.api_version = api_version;
        }
        if let Some(timeout) = timeout {
            self.timeout = timeout;
        }
        if let Some(max_retries) = max_retries {
            self.max_retries = max_retries;
        }
        if let Some(retry_delay_ms) = retry_delay_ms {
            self.retry_delay_ms = retry_delay_ms;
        }
        if let Some(temperature) = temperature {
            self.temperature = temperature;
        }
    }

    /// Returns true if requests should use the Azure OpenAI URL and header scheme
    pub fn is_azure(&self) -> bool {
        self.api_version.is_some()
    }

    /// API key from config, falling back to `api_key_env`
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }

    /// Same config with the key masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.api_key.is_some() {
            copy.api_key = Some("********".into());
        }
        copy
    }
}
