//! Integration tests for the HTTP provider adapters
//!
//! Tests behavioral contracts against a wiremock server:
//! - Request/response handling for both vendor dialects
//! - Rate-limit errors surfacing classification hints in message text
//! - Token usage and cost tracking
//! - Fix-prompt composition on repair attempts

use albench::llm::provider::{FinishReason, GenerationRequest, LlmError, LlmProvider};
use albench::llm::providers::anthropic::{AnthropicConfig, AnthropicProvider};
use albench::llm::providers::openai::{OpenAiConfig, OpenAiProvider};
use albench::testing::mocks::{test_context, test_manifest, test_variant};
use albench::types::ExecutionContext;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn anthropic_config(base_url: &str) -> AnthropicConfig {
    AnthropicConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
        version: "2023-06-01".to_string(),
    }
}

fn openai_config(base_url: &str) -> OpenAiConfig {
    OpenAiConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
        provider_name: "openai".to_string(),
    }
}

fn request(model: &str) -> GenerationRequest {
    GenerationRequest {
        instructions: "Write a greeter codeunit.".to_string(),
        model: model.to_string(),
        temperature: 0.2,
        max_tokens: 512,
        system_prompt: None,
        thinking_budget: None,
        timeout: Duration::from_secs(5),
    }
}

fn context() -> ExecutionContext {
    test_context(Arc::new(test_manifest("t1")), &test_variant())
}

fn anthropic_body(text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "msg_123",
        "type": "message",
        "role": "assistant",
        "content": [{ "type": "text", "text": text }],
        "model": "claude-sonnet-4",
        "stop_reason": "end_turn",
        "usage": { "input_tokens": 40, "output_tokens": 60 }
    })
}

#[tokio::test]
async fn test_anthropic_generate_code_success() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "test-api-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(anthropic_body("```al\ncodeunit 50100 A {}\n```")),
        )
        .mount(&mock_server)
        .await;

    let provider = AnthropicProvider::new(anthropic_config(&mock_server.uri())).unwrap();
    let response = provider
        .generate_code(&request("claude-sonnet-4"), &context())
        .await
        .unwrap();

    assert!(response.content.contains("codeunit 50100"));
    assert_eq!(response.usage.prompt_tokens, 40);
    assert_eq!(response.usage.completion_tokens, 60);
    assert_eq!(response.usage.total_tokens, 100);
    assert!(response.usage.estimated_cost.unwrap() > 0.0);
    assert_eq!(response.finish_reason, FinishReason::Stop);
}

#[tokio::test]
async fn test_anthropic_rate_limit_keeps_hint_in_message() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(
            ResponseTemplate::new(429).set_body_string("rate limited, Retry-After: 3"),
        )
        .mount(&mock_server)
        .await;

    let provider = AnthropicProvider::new(anthropic_config(&mock_server.uri())).unwrap();
    let error = provider
        .generate_code(&request("claude-sonnet-4"), &context())
        .await
        .unwrap_err();

    match error {
        LlmError::RateLimitExceeded(message) => {
            // The work pool classifies and parses from this text.
            assert!(message.contains("429"));
            assert!(message.contains("Retry-After: 3"));
        }
        other => panic!("expected rate limit error, got {other}"),
    }
}

#[tokio::test]
async fn test_anthropic_fix_prompt_carries_previous_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_string_contains("AL0118"))
        .and(body_string_contains("codeunit 50100 Broken"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(anthropic_body("```al\ncodeunit 50100 Fixed {}\n```")),
        )
        .mount(&mock_server)
        .await;

    let provider = AnthropicProvider::new(anthropic_config(&mock_server.uri())).unwrap();
    let response = provider
        .generate_fix(
            "codeunit 50100 Broken {}",
            &["Compilation failed: AL0118".to_string()],
            &request("claude-sonnet-4"),
            &context(),
        )
        .await
        .unwrap();

    assert!(response.content.contains("Fixed"));
}

#[tokio::test]
async fn test_openai_generate_code_success() {
    let mock_server = MockServer::start().await;
    let body = serde_json::json!({
        "id": "chatcmpl-1",
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": "```al\ntable 50100 T {}\n```" },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 30, "completion_tokens": 50, "total_tokens": 80 }
    });
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-api-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(openai_config(&mock_server.uri())).unwrap();
    let response = provider
        .generate_code(&request("gpt-4o"), &context())
        .await
        .unwrap();

    assert!(response.content.contains("table 50100"));
    assert_eq!(response.usage.total_tokens, 80);
    assert_eq!(response.finish_reason, FinishReason::Stop);
}

#[tokio::test]
async fn test_openai_sends_system_prompt_when_set() {
    let mock_server = MockServer::start().await;
    let body = serde_json::json!({
        "model": "gpt-4o",
        "choices": [{
            "message": { "role": "assistant", "content": "ok" },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2 }
    });
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Only output AL code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(openai_config(&mock_server.uri())).unwrap();
    let mut req = request("gpt-4o");
    req.system_prompt = Some("Only output AL code.".to_string());
    let response = provider.generate_code(&req, &context()).await;
    assert!(response.is_ok());
}

#[tokio::test]
async fn test_openai_server_error_is_api_error_with_status() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(openai_config(&mock_server.uri())).unwrap();
    let error = provider
        .generate_code(&request("gpt-4o"), &context())
        .await
        .unwrap_err();

    // "503" in the message text lands in the transient class downstream.
    assert!(error.to_string().contains("503"));
}
