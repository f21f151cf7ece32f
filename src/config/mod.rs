use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Language oracle (Ollama generate endpoint)
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding model backing the semantic index
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Per-function pipeline limits
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// External static checker
    #[serde(default)]
    pub checker: CheckerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama API URL
    #[serde(default = "default_ollama_url")]
    pub url: String,

    /// Model used for every prompt kind
    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Fixed sampling seed so unchanged inputs reproduce unchanged artifacts
    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Build the semantic index at start-up
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_ollama_url")]
    pub url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum candidate files per function
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Nearest snippets requested from the semantic index
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,

    /// Repair attempts after the first draft
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Concurrent per-function pipelines
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Truncation limit for every source excerpt placed in a prompt
    #[serde(default = "default_max_source_snippet_chars")]
    pub max_source_snippet_chars: usize,

    #[serde(default = "default_max_tree_depth")]
    pub max_tree_depth: usize,

    #[serde(default = "default_max_tree_entries")]
    pub max_tree_entries: usize,

    /// Accept artifacts whose only diagnostics are warnings
    #[serde(default = "default_enabled")]
    pub tolerate_warnings: bool,

    /// Exit non-zero when any function ends FAILED
    #[serde(default = "default_enabled")]
    pub strict: bool,

    /// Accept an otherwise clean artifact when the external checker crashed
    #[serde(default)]
    pub accept_on_checker_crash: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerConfig {
    /// Executable to run
    #[serde(default = "default_checker_command")]
    pub command: String,

    /// Arguments placed before the artifact path
    #[serde(default = "default_checker_args")]
    pub args: Vec<String>,

    #[serde(default = "default_checker_timeout")]
    pub timeout_seconds: u64,

    /// Raw checker output kept in reports
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_model() -> String {
    "qwen2.5-coder:7b".to_string()
}

fn default_temperature() -> f32 {
    0.0
}

fn default_seed() -> u64 {
    42
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_timeout() -> u64 {
    60
}

fn default_top_n() -> usize {
    10
}

fn default_retrieval_k() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_workers() -> usize {
    4
}

fn default_max_source_snippet_chars() -> usize {
    8000
}

fn default_max_tree_depth() -> usize {
    20
}

fn default_max_tree_entries() -> usize {
    5000
}

fn default_checker_command() -> String {
    "pylint".to_string()
}

fn default_checker_args() -> Vec<String> {
    vec![
        "--disable=all".to_string(),
        "--enable=E".to_string(),
        "--output-format=json".to_string(),
    ]
}

fn default_checker_timeout() -> u64 {
    60
}

fn default_max_output_bytes() -> usize {
    10_000
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            model: default_llm_model(),
            temperature: default_temperature(),
            seed: default_seed(),
            timeout_seconds: default_llm_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            url: default_ollama_url(),
            model: default_embedding_model(),
            timeout_seconds: default_embedding_timeout(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            retrieval_k: default_retrieval_k(),
            max_attempts: default_max_attempts(),
            workers: default_workers(),
            max_source_snippet_chars: default_max_source_snippet_chars(),
            max_tree_depth: default_max_tree_depth(),
            max_tree_entries: default_max_tree_entries(),
            tolerate_warnings: true,
            strict: true,
            accept_on_checker_crash: false,
        }
    }
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            command: default_checker_command(),
            args: default_checker_args(),
            timeout_seconds: default_checker_timeout(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl Config {
    /// Load configuration from file, or fall back to defaults if not found
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(Self::default_config_path);

        let config = match config_path {
            Some(ref path) if path.exists() => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config from {:?}", path))?;
                toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config from {:?}", path))?
            }
            _ => Config::default(),
        };

        Ok(config)
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "pbtgen", "pbtgen")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reject settings no pipeline can run with.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.top_n < 1 {
            anyhow::bail!("pipeline.top_n must be at least 1");
        }
        if self.pipeline.workers < 1 {
            anyhow::bail!("pipeline.workers must be at least 1");
        }
        if self.pipeline.retrieval_k < 1 {
            anyhow::bail!("pipeline.retrieval_k must be at least 1");
        }
        if self.checker.command.trim().is_empty() {
            anyhow::bail!("checker.command must not be empty");
        }
        Ok(())
    }
}
