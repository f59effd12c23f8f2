//! Model variant specs and display ids
//!
//! A variant is a `(provider, model, config)` triple. Specs are written as
//! `provider/model` or `provider/model@k=v;k=v` on the command line; the
//! display id re-emits the config keys in canonical order so equivalent
//! specs collapse to one id. Two variants are equal iff their display ids
//! are equal.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Config overlay recognized on top of provider defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<SystemPromptSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<ThinkingBudget>,
}

/// System prompt reference: a named prompt resolved from harness config, or
/// inline text supplied directly in a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemPromptSpec {
    Named(String),
    Inline(String),
}

/// Reasoning budget: explicit token count or a discrete effort tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThinkingBudget {
    Tokens(u32),
    Effort(String),
}

impl fmt::Display for ThinkingBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThinkingBudget::Tokens(n) => write!(f, "{n}"),
            ThinkingBudget::Effort(tag) => write!(f, "{tag}"),
        }
    }
}

/// One benchmark participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVariant {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub config: VariantConfig,
}

/// Variant spec parsing errors
#[derive(Debug, Error, PartialEq)]
pub enum VariantError {
    #[error("Variant spec must be provider/model[@k=v;...]: {0}")]
    MissingProvider(String),
    #[error("Malformed config entry (expected k=v): {0}")]
    MalformedEntry(String),
    #[error("Unrecognized config key: {0}")]
    UnknownKey(String),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

impl ModelVariant {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            config: VariantConfig::default(),
        }
    }

    /// Parse `provider/model` or `provider/model@k=v;k=v`.
    ///
    /// Keys are matched case-insensitively against the alias table; the
    /// model part may itself contain slashes (openrouter-style paths).
    pub fn parse(spec: &str) -> Result<Self, VariantError> {
        let (base, overlay) = match spec.split_once('@') {
            Some((base, overlay)) => (base, Some(overlay)),
            None => (spec, None),
        };

        let (provider, model) = base
            .split_once('/')
            .ok_or_else(|| VariantError::MissingProvider(spec.to_string()))?;
        if provider.is_empty() || model.is_empty() {
            return Err(VariantError::MissingProvider(spec.to_string()));
        }

        let mut config = VariantConfig::default();
        if let Some(overlay) = overlay {
            for entry in overlay.split(';').filter(|e| !e.is_empty()) {
                let (key, value) = entry
                    .split_once('=')
                    .ok_or_else(|| VariantError::MalformedEntry(entry.to_string()))?;
                apply_entry(&mut config, key.trim(), value.trim())?;
            }
        }

        Ok(Self {
            provider: provider.to_string(),
            model: model.to_string(),
            config,
        })
    }

    /// Canonical display id: `provider/model` plus the set config keys in
    /// canonical order. Equivalent overlays produce identical ids.
    pub fn display_id(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(max_tokens) = self.config.max_tokens {
            parts.push(format!("maxTokens={max_tokens}"));
        }
        match &self.config.system_prompt {
            Some(SystemPromptSpec::Named(name)) => parts.push(format!("systemPrompt={name}")),
            Some(SystemPromptSpec::Inline(_)) => parts.push("systemPrompt=inline".to_string()),
            None => {}
        }
        if let Some(temperature) = self.config.temperature {
            parts.push(format!("temperature={temperature}"));
        }
        if let Some(thinking) = &self.config.thinking_budget {
            parts.push(format!("thinkingBudget={thinking}"));
        }
        if let Some(timeout_ms) = self.config.timeout_ms {
            parts.push(format!("timeout={timeout_ms}"));
        }

        if parts.is_empty() {
            format!("{}/{}", self.provider, self.model)
        } else {
            format!("{}/{}@{}", self.provider, self.model, parts.join(";"))
        }
    }
}

impl PartialEq for ModelVariant {
    fn eq(&self, other: &Self) -> bool {
        self.display_id() == other.display_id()
    }
}

impl Eq for ModelVariant {}

impl std::hash::Hash for ModelVariant {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.display_id().hash(state);
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_id())
    }
}

fn apply_entry(config: &mut VariantConfig, key: &str, value: &str) -> Result<(), VariantError> {
    let invalid = || VariantError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    };

    match key.to_ascii_lowercase().as_str() {
        "temp" | "temperature" => {
            config.temperature = Some(value.parse::<f64>().map_err(|_| invalid())?);
        }
        "maxtokens" | "max_tokens" | "tokens" => {
            config.max_tokens = Some(value.parse::<u32>().map_err(|_| invalid())?);
        }
        "prompt" | "systemprompt" | "system_prompt" => {
            if value.is_empty() {
                return Err(invalid());
            }
            config.system_prompt = Some(SystemPromptSpec::Named(value.to_string()));
        }
        "timeout" => {
            config.timeout_ms = Some(value.parse::<u64>().map_err(|_| invalid())?);
        }
        "thinking" | "thinkingbudget" | "thinking_budget" | "reasoning" | "reasoning_budget" => {
            config.thinking_budget = Some(if value.chars().all(|c| c.is_ascii_digit()) {
                ThinkingBudget::Tokens(value.parse::<u32>().map_err(|_| invalid())?)
            } else {
                ThinkingBudget::Effort(value.to_string())
            });
        }
        _ => return Err(VariantError::UnknownKey(key.to_string())),
    }
    Ok(())
}
