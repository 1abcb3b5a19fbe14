use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PitchlensError, Result};

/// Top-level pitchlens configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    pub model: ModelConfig,
    /// Model used for slide extraction. Falls back to `model` when unset.
    #[serde(default)]
    pub vision_model: Option<ModelConfig>,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub search: Option<SearchConfig>,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

fn default_workspace() -> String { "~/.pitchlens".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Web search provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_provider")]
    pub provider: String,
    pub api_key: String,
    #[serde(default = "default_search_results")]
    pub max_results: usize,
}

fn default_search_provider() -> String { "tavily".to_string() }
fn default_search_results() -> usize { 3 }

/// Page fetcher settings for repository research.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_fetch_max_length")]
    pub max_length: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_length: default_fetch_max_length(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_fetch_timeout() -> u64 { 30 }
fn default_fetch_max_length() -> usize { 50_000 }
fn default_user_agent() -> String { "Mozilla/5.0 (compatible; pitchlens/0.3)".to_string() }

/// Content index for summaries and the Q&A assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_enabled")]
    pub enabled: bool,
    /// Database path. Defaults to `<workspace>/index.db`.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: default_index_enabled(),
            path: None,
        }
    }
}

fn default_index_enabled() -> bool { true }

/// Engine limits shared by every workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Maximum stage executions per run before the run is halted.
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
    /// Fan-out worker count is `available_parallelism * fan_out_multiplier`.
    #[serde(default = "default_fan_out_multiplier")]
    pub fan_out_multiplier: usize,
    /// Per-task timeout inside a fan-out batch.
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            recursion_limit: default_recursion_limit(),
            fan_out_multiplier: default_fan_out_multiplier(),
            task_timeout_secs: default_task_timeout(),
        }
    }
}

fn default_recursion_limit() -> usize { 25 }
fn default_fan_out_multiplier() -> usize { 4 }
fn default_task_timeout() -> u64 { 120 }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Checkpoint / resume configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,
    /// SQLite path. Defaults to `<workspace>/checkpoints.db`.
    #[serde(default)]
    pub path: Option<String>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| PitchlensError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| PitchlensError::Config(e.to_string()))
    }

    /// Build a config from environment variables alone.
    ///
    /// Requires `OPENAI_API_KEY`. `PITCHLENS_TEXT_MODEL`, `PITCHLENS_VISION_MODEL`
    /// and `TAVILY_API_KEY` are picked up when present.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| PitchlensError::Config("OPENAI_API_KEY is not set".into()))?;
        let text_model =
            std::env::var("PITCHLENS_TEXT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let model = ModelConfig {
            provider: default_provider(),
            model_id: text_model,
            api_key: Some(api_key),
            base_url: std::env::var("OPENAI_BASE_URL").ok(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: Some(RetryConfig::default()),
        };
        let vision_model = std::env::var("PITCHLENS_VISION_MODEL").ok().map(|id| ModelConfig {
            model_id: id,
            ..model.clone()
        });
        let search = std::env::var("TAVILY_API_KEY").ok().map(|key| SearchConfig {
            provider: default_search_provider(),
            api_key: key,
            max_results: default_search_results(),
        });

        Ok(Self {
            workspace: default_workspace(),
            model,
            vision_model,
            fallback_models: vec![],
            search,
            fetch: FetchConfig::default(),
            index: IndexConfig::default(),
            workflow: WorkflowConfig::default(),
            checkpoint: CheckpointConfig::default(),
        })
    }

    /// Resolve the workspace directory (expand ~).
    pub fn workspace_dir(&self) -> PathBuf {
        expand_home(&self.workspace)
    }

    /// Model used for slide extraction.
    pub fn vision_model(&self) -> &ModelConfig {
        self.vision_model.as_ref().unwrap_or(&self.model)
    }

    pub fn index_path(&self) -> PathBuf {
        match &self.index.path {
            Some(p) => expand_home(p),
            None => self.workspace_dir().join("index.db"),
        }
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        match &self.checkpoint.path {
            Some(p) => expand_home(p),
            None => self.workspace_dir().join("checkpoints.db"),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
