//! LLM provider abstraction and trait definitions
//!
//! Defines the generation-side contract the work pool consumes: a request
//! carrying the rendered task instructions, a response with content and token
//! usage, and the `LlmProvider` trait implemented per vendor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::types::ExecutionContext;

/// Parameters for one generation call, derived from the execution context
/// and the model variant under test.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Rendered task instructions (prompt template with fields substituted).
    pub instructions: String,
    /// Model identifier as the vendor expects it.
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Optional system prompt resolved from the variant config.
    pub system_prompt: Option<String>,
    /// Optional reasoning budget (tokens) for models that support it.
    pub thinking_budget: Option<u32>,
    /// Deadline the adapter should honor for the whole call.
    pub timeout: Duration,
}

/// Token usage reported by the vendor for a single call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Estimated cost in USD when the adapter knows the price table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
}

/// Reason why generation finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Error,
}

/// One completed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
    /// Wall-clock duration of the vendor call in milliseconds.
    pub duration_ms: u64,
    pub finish_reason: FinishReason,
}

impl LlmResponse {
    /// Placeholder response recorded for attempts whose LLM call failed.
    pub fn failed() -> Self {
        Self {
            content: String::new(),
            model: "unknown".to_string(),
            usage: TokenUsage::default(),
            duration_ms: 0,
            finish_reason: FinishReason::Error,
        }
    }
}

/// Provider-side generation contract consumed by the work pool.
///
/// `generate_code` drives the first attempt; `generate_fix` drives repair
/// attempts and receives the previous extracted code plus the failure
/// reasons recorded for it.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g. "anthropic", "openai").
    fn name(&self) -> &str;

    async fn generate_code(
        &self,
        request: &GenerationRequest,
        context: &ExecutionContext,
    ) -> Result<LlmResponse, LlmError>;

    async fn generate_fix(
        &self,
        previous_code: &str,
        errors: &[String],
        request: &GenerationRequest,
        context: &ExecutionContext,
    ) -> Result<LlmResponse, LlmError>;
}

/// LLM provider errors
///
/// The message text carries the classification hints the work pool matches
/// against (rate-limit vs. transient vs. fatal), so constructors keep the
/// upstream wording intact.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("API error: {0}")]
    ApiError(String),
}

/// Resolves `(provider, model, temperature, max_tokens)` to a provider
/// instance. Providers register once at harness assembly; resolution is by
/// provider name only since model and sampling parameters travel in the
/// request.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: std::collections::HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers
            .insert(provider.name().to_string(), provider);
    }

    pub fn resolve(&self, provider: &str) -> Result<Arc<dyn LlmProvider>, LlmError> {
        self.providers
            .get(provider)
            .cloned()
            .ok_or_else(|| LlmError::NotConfigured(format!("no provider registered: {provider}")))
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage_default() {
        let usage = TokenUsage::default();
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.completion_tokens, 0);
        assert_eq!(usage.total_tokens, 0);
        assert!(usage.estimated_cost.is_none());
    }

    #[test]
    fn test_failed_response_placeholder() {
        let response = LlmResponse::failed();
        assert!(response.content.is_empty());
        assert_eq!(response.model, "unknown");
        assert_eq!(response.finish_reason, FinishReason::Error);
        assert_eq!(response.usage.total_tokens, 0);
    }

    #[test]
    fn test_llm_error_display() {
        let errors = vec![
            LlmError::NotConfigured("test".to_string()),
            LlmError::AuthenticationFailed("test".to_string()),
            LlmError::RateLimitExceeded("test".to_string()),
            LlmError::RequestFailed("test".to_string()),
            LlmError::InvalidResponse("test".to_string()),
            LlmError::NetworkError("test".to_string()),
            LlmError::ApiError("test".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_finish_reason_serialization() {
        let json = serde_json::to_string(&FinishReason::Stop).unwrap();
        assert_eq!(json, "\"stop\"");
        let json = serde_json::to_string(&FinishReason::Length).unwrap();
        assert_eq!(json, "\"length\"");
    }

    #[test]
    fn test_registry_resolution_unknown_provider() {
        let registry = ProviderRegistry::new();
        let result = registry.resolve("anthropic");
        assert!(matches!(result, Err(LlmError::NotConfigured(_))));
    }
}
