//! # Configuration
//!
//! Loading and parsing of the application's configuration file.
//! Every component receives its section by value at construction time;
//! there is no process-wide settings singleton.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Main application configuration structure.
/// Matches the layout of `config.yaml` (or `.json`).
#[derive(Debug, Default, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

impl AppConfig {
    /// Load configuration from a YAML or JSON file, keyed on extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        } else {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        };
        Ok(config)
    }
}

/// Sampling parameters forwarded to the generation backend.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            base_url: None,
            model_name: None,
            api_key_env: None,
        }
    }
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    0.9
}

fn default_max_tokens() -> u32 {
    2048
}

/// Policy settings for the workspace store.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_path")]
    pub path: String,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_true")]
    pub backup_enabled: bool,
    #[serde(default)]
    pub backup_path: Option<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            path: default_workspace_path(),
            allowed_extensions: default_allowed_extensions(),
            max_file_size_mb: default_max_file_size_mb(),
            backup_enabled: true,
            backup_path: None,
        }
    }
}

fn default_workspace_path() -> String {
    "workspace".to_string()
}

fn default_allowed_extensions() -> Vec<String> {
    [
        ".py", ".txt", ".md", ".json", ".yaml", ".yml", ".html", ".css", ".js", ".jsx", ".ts",
        ".tsx",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_size_mb() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Settings for the sandbox executor.
#[derive(Debug, Deserialize, Clone)]
pub struct ExecutorConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_kb")]
    pub max_output_kb: u64,
    /// Environment variables the child process may inherit from the caller.
    #[serde(default = "default_env_allowlist")]
    pub env_allowlist: Vec<String>,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_test_runner")]
    pub test_runner: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_output_kb: default_max_output_kb(),
            env_allowlist: default_env_allowlist(),
            interpreter: default_interpreter(),
            test_runner: default_test_runner(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_output_kb() -> u64 {
    1024
}

fn default_env_allowlist() -> Vec<String> {
    ["PATH", "HOME", "LANG", "TMPDIR"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_test_runner() -> Vec<String> {
    ["python3", "-m", "pytest", "-v"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Loop-level settings.
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_mode")]
    pub mode: AgentMode,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Every action is routed through the caller-supplied decision hook.
    Approval,
    /// All actions are auto-approved; the hook is never consulted.
    Autonomous,
}

fn default_mode() -> AgentMode {
    AgentMode::Approval
}

fn default_max_iterations() -> u32 {
    100
}
