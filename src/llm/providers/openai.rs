//! OpenAI provider implementation
//!
//! Also serves Azure-style deployments and OpenRouter, which speak the
//! same chat-completions dialect behind a different base URL.

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

const PRICE_PER_M_INPUT: f64 = 2.5;
const PRICE_PER_M_OUTPUT: f64 = 10.0;

/// OpenAI provider configuration
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    /// Registered under this provider name, so one implementation can back
    /// "openai", "azure", or "openrouter" entries.
    pub provider_name: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: Duration::from_secs(120),
            provider_name: "openai".to_string(),
        }
    }
}

/// OpenAI provider implementation
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::NotConfigured(
                "OpenAI API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn with_api_key(api_key: impl Into<String>) -> Result<Self, LlmError> {
        Self::new(OpenAiConfig {
            api_key: api_key.into(),
            ..OpenAiConfig::default()
        })
    }

    fn convert_finish_reason(reason: Option<&str>) -> FinishReason {
        match reason {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Error,
        }
    }

    async fn complete(
        &self,
        prompt: String,
        request: &GenerationRequest,
    ) -> Result<LlmResponse, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt,
        });

        let body = ChatCompletionRequest {
            model: request.model.clone(),
            messages,
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
        };

        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(LlmError::RateLimitExceeded(format!(
                    "OpenAI API error: {status} - {error_text}"
                )));
            }
            return Err(LlmError::ApiError(format!(
                "OpenAI API error: {status} - {error_text}"
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("No choices returned".to_string()))?;

        let prompt_tokens = u64::from(parsed.usage.prompt_tokens);
        let completion_tokens = u64::from(parsed.usage.completion_tokens);
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
            content: choice.message.content.unwrap_or_default(),
            model: parsed.model,
            usage,
            duration_ms: started.elapsed().as_millis() as u64,
            finish_reason: Self::convert_finish_reason(choice.finish_reason.as_deref()),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.provider_name
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
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<ChatChoice>,
    usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        let result = OpenAiProvider::new(OpenAiConfig::default());
        assert!(matches!(result, Err(LlmError::NotConfigured(_))));
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(
            OpenAiProvider::convert_finish_reason(Some("stop")),
            FinishReason::Stop
        );
        assert_eq!(
            OpenAiProvider::convert_finish_reason(Some("length")),
            FinishReason::Length
        );
        assert_eq!(
            OpenAiProvider::convert_finish_reason(Some("content_filter")),
            FinishReason::ContentFilter
        );
    }

    #[test]
    fn test_custom_provider_name() {
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: "test-key".to_string(),
            provider_name: "openrouter".to_string(),
            ..OpenAiConfig::default()
        })
        .unwrap();
        assert_eq!(provider.name(), "openrouter");
    }
}
