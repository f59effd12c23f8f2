//! Harness configuration
//!
//! TOML-backed configuration for a benchmark run: run-wide knobs, per
//! provider rate-limit overrides, sandbox wiring, API-key environment
//! indirection (keys never live in the file itself), and named system
//! prompts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::queue::QueueConfig;
use crate::ratelimit::ProviderLimits;

/// Main harness configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessConfig {
    #[serde(default)]
    pub run: RunSection,
    /// Per-provider rate limit overrides; providers not listed keep their
    /// built-in budgets.
    #[serde(default)]
    pub providers: HashMap<String, ProviderLimitsSection>,
    pub sandbox: SandboxSection,
    /// Provider name to the environment variable holding its API key.
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    /// Named system prompts referenced from variant specs.
    #[serde(default)]
    pub system_prompts: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSection {
    /// Label naming the results subdirectory for this run.
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Tasks processed concurrently; 1 means strictly sequential.
    #[serde(default = "default_task_concurrency")]
    pub task_concurrency: usize,
    /// Process-wide cap on in-flight LLM calls.
    #[serde(default = "default_max_concurrent_llm")]
    pub max_concurrent_llm: usize,
    /// Treat designated critical errors as run-aborting.
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default = "default_executed_by")]
    pub executed_by: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub debug: bool,
    /// Where per-variant working files (debug dumps) land.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Default per-call timeout in ms when a variant sets none.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Default sampling temperature when a variant sets none.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Default completion budget when a variant sets none.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            label: default_label(),
            results_dir: default_results_dir(),
            task_concurrency: default_task_concurrency(),
            max_concurrent_llm: default_max_concurrent_llm(),
            fail_fast: false,
            executed_by: default_executed_by(),
            environment: default_environment(),
            debug: false,
            output_dir: default_output_dir(),
            call_timeout_ms: default_call_timeout_ms(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderLimitsSection {
    pub concurrent: usize,
    pub requests_per_minute: usize,
    pub tokens_per_minute: u64,
}

impl From<&ProviderLimitsSection> for ProviderLimits {
    fn from(section: &ProviderLimitsSection) -> Self {
        Self {
            concurrent: section.concurrent,
            requests_per_minute: section.requests_per_minute,
            tokens_per_minute: section.tokens_per_minute,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxSection {
    /// Sandbox provider name resolved from the registry ("http", "mock").
    pub provider: String,
    /// Compile-service URL for the http provider.
    #[serde(default)]
    pub base_url: Option<String>,
    /// One compile queue is created per sandbox name.
    pub names: Vec<String>,
    #[serde(default = "default_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_queue_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_runtime")]
    pub runtime: String,
}

fn default_label() -> String {
    "default".to_string()
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_task_concurrency() -> usize {
    1
}

fn default_max_concurrent_llm() -> usize {
    5
}

fn default_executed_by() -> String {
    "albench".to_string()
}

fn default_environment() -> String {
    "local".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_call_timeout_ms() -> u64 {
    120_000
}

fn default_temperature() -> f64 {
    0.2
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_queue_size() -> usize {
    50
}

fn default_queue_timeout_ms() -> u64 {
    300_000
}

fn default_platform() -> String {
    "1.0.0.0".to_string()
}

fn default_runtime() -> String {
    "11.0".to_string()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVar(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HarnessConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: HarnessConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sandbox.names.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "[sandbox] requires at least one sandbox name".to_string(),
            ));
        }
        if self.run.task_concurrency == 0 {
            return Err(ConfigError::InvalidConfig(
                "run.task_concurrency must be >= 1".to_string(),
            ));
        }
        if self.run.max_concurrent_llm == 0 {
            return Err(ConfigError::InvalidConfig(
                "run.max_concurrent_llm must be >= 1".to_string(),
            ));
        }
        if self.sandbox.provider == "http" && self.sandbox.base_url.is_none() {
            return Err(ConfigError::InvalidConfig(
                "sandbox.base_url is required for the http provider".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve a provider's API key through its configured env variable.
    pub fn api_key(&self, provider: &str) -> Result<String, ConfigError> {
        let env_name = self
            .credentials
            .get(provider)
            .ok_or_else(|| {
                ConfigError::InvalidConfig(format!("no credentials entry for provider {provider}"))
            })?;
        std::env::var(env_name).map_err(|_| ConfigError::EnvVar(env_name.clone()))
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_queue_size: self.sandbox.max_queue_size,
            timeout: std::time::Duration::from_millis(self.sandbox.timeout_ms),
            platform: self.sandbox.platform.clone(),
            runtime: self.sandbox.runtime.clone(),
        }
    }

    pub fn provider_limits(&self) -> Vec<(String, ProviderLimits)> {
        self.providers
            .iter()
            .map(|(name, section)| (name.clone(), ProviderLimits::from(section)))
            .collect()
    }
}
