//! Anthropic provider using the Messages API
//!
//! Counts tokens remotely through `/v1/messages/count_tokens` and captures
//! thinking blocks as reasoning when extended thinking is requested.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{
    estimate_tokens, Capabilities, PromptRequest, PromptResponse, Provider, TokenUsage,
};
use crate::error::{AnalysisError, Result};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8192;
/// Smallest thinking budget the API accepts
const MIN_THINKING_BUDGET: u32 = 1024;

pub struct AnthropicProvider {
    api_key: String,
    client: Client,
    base_url: String,
}

impl AnthropicProvider {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: Client::new(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bulk-analysis/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AnalysisError::InvalidConfig {
                message: format!("cannot build HTTP client: {}", e),
            })?;
        Ok(self)
    }

    fn build_body(&self, request: &PromptRequest) -> Value {
        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let mut body = json!({
            "model": request.model,
            "max_tokens": max_tokens,
            "messages": [
                { "role": "user", "content": request.prompt }
            ]
        });

        if let Some(ref system) = request.system_prompt {
            body["system"] = json!(system);
        }

        if request.thinking {
            // Budget must stay below max_tokens
            let budget = (max_tokens / 2).max(MIN_THINKING_BUDGET);
            if budget < max_tokens {
                body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
            }
        } else if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }

        body
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| AnalysisError::ProviderApiError {
                message: format!("failed to reach Anthropic API: {}", e),
            })
    }

    async fn count_remote(&self, text: &str, model: &str) -> Result<u32> {
        let body = json!({
            "model": model,
            "messages": [ { "role": "user", "content": text } ]
        });
        let response = self.post("/v1/messages/count_tokens", &body).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AnalysisError::ProviderApiError {
                message: format!("count_tokens failed ({}): {}", status, text),
            });
        }
        let json: Value = response
            .json()
            .await
            .map_err(|e| AnalysisError::ProviderApiError {
                message: format!("invalid count_tokens response: {}", e),
            })?;
        json["input_tokens"]
            .as_u64()
            .map(|n| n as u32)
            .ok_or_else(|| AnalysisError::ProviderApiError {
                message: "count_tokens response has no input_tokens".to_string(),
            })
    }
}

/// Split content blocks into (text, thinking)
fn collect_blocks(json: &Value) -> (String, Option<String>) {
    let mut text = Vec::new();
    let mut thinking = Vec::new();
    for block in json["content"].as_array().into_iter().flatten() {
        match block["type"].as_str() {
            Some("text") => text.extend(block["text"].as_str()),
            Some("thinking") => thinking.extend(block["thinking"].as_str()),
            _ => {}
        }
    }
    let thinking = if thinking.is_empty() {
        None
    } else {
        Some(thinking.join("\n\n"))
    };
    (text.join(""), thinking)
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::anthropic()
    }

    async fn generate(&self, request: PromptRequest) -> Result<PromptResponse> {
        let body = self.build_body(&request);

        tracing::debug!(
            provider = "anthropic",
            model = %request.model,
            thinking = request.thinking,
            "Sending request to Anthropic API"
        );

        let response = self.post("/v1/messages", &body).await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                provider = "anthropic",
                status = %status,
                error = %error_text,
                "Anthropic API error"
            );
            return Ok(PromptResponse::failure(format!(
                "Anthropic API error ({}): {}",
                status, error_text
            )));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| AnalysisError::ProviderApiError {
                message: format!("failed to parse Anthropic API response: {}", e),
            })?;

        let (content, reasoning) = collect_blocks(&json);
        let usage = match (
            json["usage"]["input_tokens"].as_u64(),
            json["usage"]["output_tokens"].as_u64(),
        ) {
            (Some(input), Some(output)) => TokenUsage::new(input as u32, output as u32),
            _ => TokenUsage::estimate(request.prompt.len(), content.len()),
        };

        tracing::debug!(
            provider = "anthropic",
            tokens = usage.total_tokens,
            has_reasoning = reasoning.is_some(),
            "Anthropic API response received"
        );

        let mut response = PromptResponse::success(content)
            .with_usage(usage)
            .with_reasoning(reasoning);
        response.stop_reason = json["stop_reason"].as_str().map(str::to_string);
        Ok(response)
    }

    /// Remote count, falling back to the estimate when the endpoint fails
    async fn count_tokens(&self, text: &str, model: &str) -> Result<u32> {
        match self.count_remote(text, model).await {
            Ok(count) => Ok(count),
            Err(e) => {
                tracing::warn!(provider = "anthropic", "Token count fell back to estimate: {}", e);
                Ok(estimate_tokens(text))
            }
        }
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }
}
