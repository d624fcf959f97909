//! Configuration loading with multi-layer merge

use super::backend::{BackendConfig, BackendLayer};
use crate::failure::Dialect;
use crate::repair::DEFAULT_JSON_RETRIES;
use crate::repair_loop::{DEFAULT_MAX_ATTEMPTS, RepairErrorPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory name for project-level configuration
pub const PROJECT_DIR: &str = ".llm-mend";

/// Top-level llm-mend configuration, after every layer is applied
#[derive(Debug, Clone, Default, Serialize)]
pub struct MendConfig {
    /// Language-model connection
    pub backend: BackendConfig,

    /// How the target is run
    pub runner: RunnerConfig,

    /// Repair loop behavior
    pub repair: RepairConfig,
}

/// Test runner settings
#[derive(Debug, Clone, Serialize)]
pub struct RunnerConfig {
    /// Shell command run instead of the target itself
    pub test_command: Option<String>,

    /// Interpreter for `.py` targets
    pub python: String,

    /// Per-run timeout in seconds
    pub timeout: Option<u64>,

    /// Output dialect used to find failure markers
    pub dialect: Dialect,

    /// Extra failure markers, searched after the dialect's own
    pub markers: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            test_command: None,
            python: "python3".into(),
            timeout: None,
            dialect: Dialect::default(),
            markers: Vec::new(),
        }
    }
}

/// Repair loop settings
#[derive(Debug, Clone, Serialize)]
pub struct RepairConfig {
    /// Test runs per loop
    pub max_attempts: u32,

    /// Backend calls per repair spent on unparseable replies.
    /// 0 fails without calling the backend; negative never gives up.
    pub json_retries: i64,

    pub on_repair_error: RepairErrorPolicy,

    /// Inline system prompt
    pub system_prompt: Option<String>,

    /// File holding the system prompt; used when `system_prompt` is unset
    pub system_prompt_file: Option<String>,

    /// minijinja template for the user message
    pub prompt_template: Option<String>,

    /// Reference documents sent with every request
    pub documents: Vec<String>,

    /// Extra roots for resolving imports
    pub search_paths: Vec<String>,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            json_retries: DEFAULT_JSON_RETRIES,
            on_repair_error: RepairErrorPolicy::default(),
            system_prompt: None,
            system_prompt_file: None,
            prompt_template: None,
            documents: Vec::new(),
            search_paths: Vec::new(),
        }
    }
}

/// One config file as written. A key that is present always wins over
/// earlier layers, even when it spells out the built-in default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    #[serde(default)]
    pub backend: BackendLayer,

    #[serde(default)]
    pub runner: RunnerLayer,

    #[serde(default)]
    pub repair: RepairLayer,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerLayer {
    pub test_command: Option<String>,
    pub python: Option<String>,
    pub timeout: Option<u64>,
    pub dialect: Option<Dialect>,
    #[serde(default)]
    pub markers: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepairLayer {
    pub max_attempts: Option<u32>,
    pub json_retries: Option<i64>,
    pub on_repair_error: Option<RepairErrorPolicy>,
    pub system_prompt: Option<String>,
    pub system_prompt_file: Option<String>,
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default)]
    pub search_paths: Vec<String>,
}

impl MendConfig {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/llm-mend/config.toml
    /// 3. .llm-mend/config.toml (project)
    /// 4. Environment variables (after reading `.env`)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_config_path) = Self::user_config_path() {
            if user_config_path.exists() {
                let user_config = Self::load_file(&user_config_path)
                    .with_context(|| format!("loading {}", user_config_path.display()))?;
                config.merge(user_config);
            }
        }

        let project_config_path = Self::project_config_path(project_dir);
        if project_config_path.exists() {
            let project_config = Self::load_file(&project_config_path)
                .with_context(|| format!("loading {}", project_config_path.display()))?;
            config.merge(project_config);
        }

        dotenvy::dotenv().ok();
        config.apply_env(|key| std::env::var(key).ok())?;

        Ok(config)
    }

    /// Read one config layer from a specific file
    pub fn load_file(path: &Path) -> Result<ConfigLayer> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let layer: ConfigLayer = toml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(layer)
    }

    /// Get the user config path (~/.config/llm-mend/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("llm-mend/config.toml"))
    }

    /// Project config path under `project_dir` (or the current directory)
    pub fn project_config_path(project_dir: Option<&Path>) -> PathBuf {
        project_dir
            .map(|p| p.join(PROJECT_DIR).join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(PROJECT_DIR).join("config.toml"))
    }

    /// Apply a file layer over this config. Scalars the layer sets replace
    /// ours; list settings accumulate across layers.
    pub fn merge(&mut self, layer: ConfigLayer) {
        self.backend.apply(layer.backend);

        let RunnerLayer {
            test_command,
            python,
            timeout,
            dialect,
            markers,
        } = layer.runner;
        if test_command.is_some() {
            self.runner.test_command = test_command;
        }
        if let Some(python) = python {
            self.runner.python = python;
        }
        if timeout.is_some() {
            self.runner.timeout = timeout;
        }
        if let Some(dialect) = dialect {
            self.runner.dialect = dialect;
        }
        for marker in markers {
            if !self.runner.markers.contains(&marker) {
                self.runner.markers.push(marker);
            }
        }

        let RepairLayer {
            max_attempts,
            json_retries,
            on_repair_error,
            system_prompt,
            system_prompt_file,
            prompt_template,
            documents,
            search_paths,
        } = layer.repair;
        if let Some(max_attempts) = max_attempts {
            self.repair.max_attempts = max_attempts;
        }
        if let Some(json_retries) = json_retries {
            self.repair.json_retries = json_retries;
        }
        if let Some(policy) = on_repair_error {
            self.repair.on_repair_error = policy;
        }
        if system_prompt.is_some() {
            self.repair.system_prompt = system_prompt;
        }
        if system_prompt_file.is_some() {
            self.repair.system_prompt_file = system_prompt_file;
        }
        if prompt_template.is_some() {
            self.repair.prompt_template = prompt_template;
        }
        self.repair.documents.extend(documents);
        self.repair.search_paths.extend(search_paths);
    }

    /// Override settings from `LLM_MEND_*` variables
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("LLM_MEND_BASE_URL") {
            self.backend.url = url;
        }
        if let Some(key) = get("LLM_MEND_API_KEY") {
            self.backend.api_key = Some(key);
        }
        if let Some(model) = get("LLM_MEND_MODEL") {
            self.backend.model = Some(model);
        }
        if let Some(deployment) = get("LLM_MEND_DEPLOYMENT") {
            self.backend.deployment = Some(deployment);
        }
        if let Some(version) = get("LLM_MEND_API_VERSION") {
            self.backend.api_version = Some(version);
        }
        if let Some(retries) = get("LLM_MEND_JSON_RETRIES") {
            self.repair.json_retries = retries
                .trim()
                .parse()
                .with_context(|| format!("LLM_MEND_JSON_RETRIES={} is not an integer", retries))?;
        }
        if let Some(attempts) = get("LLM_MEND_MAX_ATTEMPTS") {
            self.repair.max_attempts = attempts.trim().parse().with_context(|| {
                format!("LLM_MEND_MAX_ATTEMPTS={} is not a positive integer", attempts)
            })?;
        }

        Ok(())
    }

    /// Check settings that would only fail later, mid-loop
    pub fn validate(&self) -> Result<()> {
        if self.repair.max_attempts == 0 {
            anyhow::bail!("repair.max_attempts must be at least 1");
        }
        if self.backend.temperature < 0.0 {
            anyhow::bail!("backend.temperature must not be negative");
        }
        if self.runner.timeout == Some(0) {
            anyhow::bail!("runner.timeout must be at least 1 second");
        }
        Ok(())
    }

    /// System prompt from inline text or file, if configured
    pub fn system_prompt(&self, base: &Path) -> Result<Option<String>> {
        if let Some(ref prompt) = self.repair.system_prompt {
            return Ok(Some(prompt.clone()));
        }
        match self.repair.system_prompt_file {
            Some(ref raw) => {
                let path = resolve_path(raw, base);
                let prompt = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading system prompt {}", path.display()))?;
                Ok(Some(prompt))
            }
            None => Ok(None),
        }
    }

    /// Configured documents, resolved against `base`
    pub fn documents(&self, base: &Path) -> Vec<PathBuf> {
        self.repair
            .documents
            .iter()
            .map(|raw| resolve_path(raw, base))
            .collect()
    }

    /// Import search roots: configured paths, then `base` itself
    pub fn search_paths(&self, base: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .repair
            .search_paths
            .iter()
            .map(|raw| resolve_path(raw, base))
            .collect();
        paths.push(base.to_path_buf());
        paths
    }
}

/// Expand `~` and make relative paths relative to `base`
pub fn resolve_path(raw: &str, base: &Path) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(raw).as_ref());
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}
