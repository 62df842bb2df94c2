use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AidenError, Result};
use crate::types::{PhaseType, TaskType};

/// Top-level AIDEN configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub hitl: HitlConfig,
    /// Named model definitions, referenced from `task_models`.
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
    /// Task type → model key.
    #[serde(default)]
    pub task_models: HashMap<String, String>,
    /// Model key used for tasks missing from `task_models`.
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_checkpoints")]
    pub checkpoints: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            checkpoints: default_checkpoints(),
        }
    }
}

fn default_database() -> String { "~/.aiden/aiden.db".to_string() }
fn default_checkpoints() -> String { "~/.aiden/checkpoints.db".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Phase type → agent name. Phases without an entry cannot run.
    #[serde(default = "default_agents")]
    pub agents: HashMap<String, String>,
    /// Upper bound on final-review revision cycles. Unset means unbounded.
    #[serde(default)]
    pub max_revisions: Option<u32>,
    /// Document type the analysis phase reads its input from.
    #[serde(default = "default_dev_request_doc_type")]
    pub dev_request_doc_type: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            agents: default_agents(),
            max_revisions: None,
            dev_request_doc_type: default_dev_request_doc_type(),
        }
    }
}

impl PipelineConfig {
    /// Agent table keyed by typed phase. Unknown phase keys are rejected.
    pub fn phase_agents(&self) -> Result<HashMap<PhaseType, String>> {
        self.agents
            .iter()
            .map(|(phase, agent)| {
                let phase: PhaseType = phase
                    .parse()
                    .map_err(|_| AidenError::Config(format!("unknown phase type '{}'", phase)))?;
                Ok((phase, agent.clone()))
            })
            .collect()
    }
}

fn default_agents() -> HashMap<String, String> {
    HashMap::from([("analysis".to_string(), "ryan".to_string())])
}
fn default_dev_request_doc_type() -> String { "dev_request".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
    /// Directory for per-project JSONL event logs. Unset disables logging.
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
            log_dir: None,
        }
    }
}

fn default_event_capacity() -> usize { 256 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Chunks fetched when loading a whole document.
    #[serde(default = "default_document_top_k")]
    pub document_top_k: usize,
    #[serde(default = "default_top_k_per_query")]
    pub top_k_per_query: usize,
    /// Target chunk size in characters for the document index.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            document_top_k: default_document_top_k(),
            top_k_per_query: default_top_k_per_query(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_document_top_k() -> usize { 50 }
fn default_top_k_per_query() -> usize { 5 }
fn default_chunk_size() -> usize { 1000 }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HitlConfig {
    /// Deadline stamped on new reviews. Unset means no deadline.
    #[serde(default)]
    pub review_deadline_hours: Option<u64>,
}

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
    pub cost_per_1k_input: f64,
    #[serde(default)]
    pub cost_per_1k_output: f64,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.1 }

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

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| AidenError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| AidenError::Config(e.to_string()))?;
        config.pipeline.phase_agents()?;
        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.storage.database)
    }

    pub fn checkpoints_path(&self) -> PathBuf {
        expand_home(&self.storage.checkpoints)
    }

    pub fn event_log_dir(&self) -> Option<PathBuf> {
        self.events.log_dir.as_deref().map(expand_home)
    }

    /// Model key for a task: explicit mapping first, then `default_model`.
    pub fn model_key_for_task(&self, task: TaskType) -> Option<&str> {
        self.task_models
            .get(task.as_str())
            .or(self.default_model.as_ref())
            .map(String::as_str)
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
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
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Unset variables stay literal.
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
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
