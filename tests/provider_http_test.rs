//! HTTP providers against a local mock server

use bulk_analysis::provider::{AnthropicProvider, OpenAIProvider, PromptRequest, Provider};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// OPENAI
// ============================================================================

#[tokio::test]
async fn test_openai_generate_parses_content_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [
                { "role": "system", "content": "Be brief." },
                { "role": "user", "content": "Summarise" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [ { "message": { "content": "A summary" } } ],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAIProvider::with_api_key("sk-test").with_base_url(server.uri());
    let response = provider
        .generate(PromptRequest::new("Summarise", "gpt-4o-mini").with_system_prompt("Be brief."))
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.content, "A summary");
    assert_eq!(response.usage.prompt_tokens, 12);
    assert_eq!(response.usage.total_tokens, 15);
}

#[tokio::test]
async fn test_openai_error_status_is_failed_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let provider = OpenAIProvider::with_api_key("sk-test").with_base_url(server.uri());
    let response = provider
        .generate(PromptRequest::new("Summarise", "gpt-4o-mini"))
        .await
        .unwrap();

    assert!(!response.success);
    assert!(response.content.contains("429"));
    assert!(response.content.contains("rate limited"));
}

// ============================================================================
// ANTHROPIC
// ============================================================================

#[tokio::test]
async fn test_anthropic_generate_separates_thinking() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "thinking": { "type": "enabled" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                { "type": "thinking", "thinking": "Compare dates first." },
                { "type": "text", "text": "Findings" }
            ],
            "usage": { "input_tokens": 40, "output_tokens": 8 },
            "stop_reason": "end_turn"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::with_api_key("sk-ant-test").with_base_url(server.uri());
    let response = provider
        .generate(
            PromptRequest::new("Analyse", "claude-sonnet-4-5")
                .with_max_tokens(8000)
                .with_thinking(true),
        )
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.content, "Findings");
    assert_eq!(response.reasoning.as_deref(), Some("Compare dates first."));
    assert_eq!(response.usage.total_tokens, 48);
    assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
}

#[tokio::test]
async fn test_anthropic_count_tokens_uses_remote_count() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages/count_tokens"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "input_tokens": 1234 })))
        .mount(&server)
        .await;

    let provider = AnthropicProvider::with_api_key("sk-ant-test").with_base_url(server.uri());
    let count = provider
        .count_tokens("some document text", "claude-sonnet-4-5")
        .await
        .unwrap();
    assert_eq!(count, 1234);
}

#[tokio::test]
async fn test_anthropic_count_tokens_falls_back_to_estimate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages/count_tokens"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let provider = AnthropicProvider::with_api_key("sk-ant-test").with_base_url(server.uri());
    // 12 chars at 3 chars per token
    let count = provider
        .count_tokens("abcdefghijkl", "claude-sonnet-4-5")
        .await
        .unwrap();
    assert_eq!(count, 4);
}
