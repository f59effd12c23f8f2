//! Anthropic provider implementation

use crate::llm::provider::{
    FinishReason, GenerationRequest, LlmError, LlmProvider, LlmResponse, TokenUsage,
};
use crate::llm::providers::build_fix_prompt;
use crate::types::ExecutionContext;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// USD per million input / output tokens, rough blended figure for cost
/// estimates in reports.
const PRICE_PER_M_INPUT: f64 = 3.0;
const PRICE_PER_M_OUTPUT: f64 = 15.0;

/// Anthropic provider configuration
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub version: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            timeout: Duration::from_secs(120),
            version: "2023-06-01".to_string(),
        }
    }
}

/// Anthropic provider implementation
pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::NotConfigured(
                "Anthropic API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn with_api_key(api_key: impl Into<String>) -> Result<Self, LlmError> {
        Self::new(AnthropicConfig {
            api_key: api_key.into(),
            ..AnthropicConfig::default()
        })
    }

    fn convert_finish_reason(reason: Option<&str>) -> FinishReason {
        match reason {
            Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
            Some("max_tokens") => FinishReason::Length,
            _ => FinishReason::Error,
        }
    }

    async fn complete(
        &self,
        prompt: String,
        request: &GenerationRequest,
    ) -> Result<LlmResponse, LlmError> {
        let thinking = request.thinking_budget.map(|budget_tokens| AnthropicThinking {
            thinking_type: "enabled".to_string(),
            budget_tokens,
        });

        let body = AnthropicMessagesRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            system: request.system_prompt.clone(),
            temperature: Some(request.temperature),
            thinking,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.version)
            .header("Content-Type", "application/json")
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            // 429 bodies carry retry hints the work pool parses from the
            // message text.
            if status.as_u16() == 429 {
                return Err(LlmError::RateLimitExceeded(format!(
                    "Anthropic API error: {status} - {error_text}"
                )));
            }
            return Err(LlmError::ApiError(format!(
                "Anthropic API error: {status} - {error_text}"
            )));
        }

        let parsed: AnthropicMessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if parsed.content.is_empty() {
            return Err(LlmError::InvalidResponse(
                "No content returned from Anthropic".to_string(),
            ));
        }

        let content = parsed
            .content
            .into_iter()
            .filter_map(|c| match c.content_type.as_str() {
                "text" => Some(c.text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let prompt_tokens = u64::from(parsed.usage.input_tokens);
        let completion_tokens = u64::from(parsed.usage.output_tokens);
        let usage = TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            estimated_cost: Some(
                prompt_tokens as f64 / 1e6 * PRICE_PER_M_INPUT
                    + completion_tokens as f64 / 1e6 * PRICE_PER_M_OUTPUT,
            ),
        };

        Ok(LlmResponse {
            content,
            model: parsed.model,
            usage,
            duration_ms: started.elapsed().as_millis() as u64,
            finish_reason: Self::convert_finish_reason(parsed.stop_reason.as_deref()),
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate_code(
        &self,
        request: &GenerationRequest,
        _context: &ExecutionContext,
    ) -> Result<LlmResponse, LlmError> {
        self.complete(request.instructions.clone(), request).await
    }

    async fn generate_fix(
        &self,
        previous_code: &str,
        errors: &[String],
        request: &GenerationRequest,
        _context: &ExecutionContext,
    ) -> Result<LlmResponse, LlmError> {
        let prompt = build_fix_prompt(&request.instructions, previous_code, errors);
        self.complete(prompt, request).await
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<AnthropicThinking>,
}

#[derive(Debug, Serialize)]
struct AnthropicThinking {
    #[serde(rename = "type")]
    thinking_type: String,
    budget_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessagesResponse {
    content: Vec<AnthropicContent>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        let result = AnthropicProvider::new(AnthropicConfig::default());
        assert!(matches!(result, Err(LlmError::NotConfigured(_))));
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(
            AnthropicProvider::convert_finish_reason(Some("end_turn")),
            FinishReason::Stop
        );
        assert_eq!(
            AnthropicProvider::convert_finish_reason(Some("max_tokens")),
            FinishReason::Length
        );
        assert_eq!(
            AnthropicProvider::convert_finish_reason(None),
            FinishReason::Error
        );
    }
}
