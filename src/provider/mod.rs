//! # Provider Abstraction Layer
//!
//! Trait and implementations for LLM providers.
//!
//! - [`Provider`] - generate text and count tokens
//! - [`AnthropicProvider`] - Messages API (remote token counting, thinking)
//! - [`OpenAIProvider`] - Chat Completions API
//! - [`MockProvider`] - queued responses and scripted failures for tests
//!
//! Credential resolution lives outside this module: a [`ProviderResolver`]
//! turns a group's provider identifier into a ready client.
//!
//! ## Token Estimation
//!
//! ```rust
//! use bulk_analysis::provider::TokenUsage;
//!
//! let usage = TokenUsage::estimate(1000, 500); // 1000 char prompt, 500 char response
//! assert_eq!(usage.total_tokens, 334 + 167);
//! ```

mod anthropic;
mod mock;
mod openai;

pub use anthropic::AnthropicProvider;
pub use mock::{MockProvider, MockReply};
pub use openai::OpenAIProvider;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ============================================================================
// TOKEN ESTIMATION CONSTANTS
// ============================================================================

/// Average characters per token for mixed content (prose + markup)
pub const CHARS_PER_TOKEN_MIXED: f32 = 3.0;

/// Estimate tokens for a text without a tokenizer
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as f32 / CHARS_PER_TOKEN_MIXED).ceil() as u32
}

// ============================================================================
// CAPABILITIES
// ============================================================================

/// Capabilities that a provider may support
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// Supports extended thinking / reasoning capture
    pub extended_thinking: bool,
    /// Counts tokens with a remote tokenizer
    pub remote_token_count: bool,
    /// Context window when the model is unknown
    pub max_context: u32,
}

impl Capabilities {
    pub fn anthropic() -> Self {
        Self {
            extended_thinking: true,
            remote_token_count: true,
            max_context: 200_000,
        }
    }

    pub fn openai() -> Self {
        Self {
            extended_thinking: false,
            remote_token_count: false,
            max_context: 128_000,
        }
    }

    pub fn mock() -> Self {
        Self {
            extended_thinking: true,
            remote_token_count: false,
            max_context: 200_000,
        }
    }
}

/// Known context windows by model-name prefix
///
/// First match wins, so longer prefixes come before the families they extend.
pub fn context_window_for(model: &str) -> Option<u32> {
    const WINDOWS: &[(&str, u32)] = &[
        ("claude-sonnet-4", 200_000),
        ("claude-opus-4", 200_000),
        ("claude-3", 200_000),
        ("claude", 200_000),
        ("gpt-4.1", 1_047_576),
        ("gpt-4.5", 128_000),
        ("gpt-4o", 128_000),
        ("gpt-4-turbo", 128_000),
        ("gpt-4-1106", 128_000),
        ("gpt-4-0125", 128_000),
        ("gpt-4-32k", 32_768),
        ("gpt-4", 8_192),
        ("gpt-3.5", 16_385),
        ("o1", 200_000),
        ("o3", 200_000),
        ("gemini", 1_000_000),
    ];
    let model = model.to_ascii_lowercase();
    WINDOWS
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, window)| *window)
}

// ============================================================================
// PROVIDER TRAIT (ASYNC)
// ============================================================================

/// Core trait that all LLM providers must implement
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the provider name (e.g., "anthropic", "openai", "mock")
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Execute one prompt
    ///
    /// Transport failures are `Err`; an API-level refusal is a response with
    /// `success == false` and the error text as content.
    async fn generate(&self, request: PromptRequest) -> Result<PromptResponse>;

    /// Token count of `text` for `model`
    async fn count_tokens(&self, text: &str, _model: &str) -> Result<u32> {
        Ok(estimate_tokens(text))
    }

    /// Context window for `model`
    fn context_window(&self, model: &str) -> u32 {
        context_window_for(model).unwrap_or_else(|| self.capabilities().max_context)
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Resolves a provider identifier to a client (credentials are external)
pub trait ProviderResolver: Send + Sync {
    fn resolve(&self, provider_id: &str) -> Result<Arc<dyn Provider>>;
}

/// Always hands out the same provider, whatever the identifier
pub struct FixedProvider(pub Arc<dyn Provider>);

impl ProviderResolver for FixedProvider {
    fn resolve(&self, _provider_id: &str) -> Result<Arc<dyn Provider>> {
        Ok(Arc::clone(&self.0))
    }
}

// ============================================================================
// REQUEST/RESPONSE TYPES
// ============================================================================

/// Request to execute a prompt
#[derive(Debug, Clone)]
pub struct PromptRequest {
    /// The user prompt
    pub prompt: String,

    pub system_prompt: Option<String>,

    /// Model to use (e.g., "claude-sonnet-4-5", "gpt-4o")
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,

    /// Temperature for generation (0.0 - 1.0)
    pub temperature: Option<f32>,

    /// Request extended thinking where supported
    pub thinking: bool,
}

impl PromptRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            system_prompt: None,
            max_tokens: None,
            temperature: None,
            thinking: false,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = if prompt.trim().is_empty() {
            None
        } else {
            Some(prompt)
        };
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_thinking(mut self, thinking: bool) -> Self {
        self.thinking = thinking;
        self
    }
}

/// Response from a prompt execution
#[derive(Debug, Clone)]
pub struct PromptResponse {
    /// The generated content (error text when `success` is false)
    pub content: String,

    pub success: bool,

    pub usage: TokenUsage,

    /// Stop reason (e.g., "end_turn", "max_tokens")
    pub stop_reason: Option<String>,

    /// Captured reasoning / thinking text, if any
    pub reasoning: Option<String>,
}

impl PromptResponse {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
            usage: TokenUsage::default(),
            stop_reason: Some("end_turn".to_string()),
            reasoning: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            content: error.into(),
            success: false,
            usage: TokenUsage::default(),
            stop_reason: Some("error".to_string()),
            reasoning: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_reasoning(mut self, reasoning: Option<String>) -> Self {
        self.reasoning = reasoning.filter(|r| !r.trim().is_empty());
        self
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt: u32, completion: u32) -> Self {
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    /// Estimate usage from character lengths
    pub fn estimate(prompt_len: usize, response_len: usize) -> Self {
        let prompt_tokens = (prompt_len as f32 / CHARS_PER_TOKEN_MIXED).ceil() as u32;
        let completion_tokens = (response_len as f32 / CHARS_PER_TOKEN_MIXED).ceil() as u32;
        Self::new(prompt_tokens, completion_tokens)
    }

    /// Sum usage across several calls (chunks)
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_request_builder() {
        let req = PromptRequest::new("Hello", "claude-sonnet-4-5")
            .with_system_prompt("You are helpful")
            .with_max_tokens(1024)
            .with_thinking(true);

        assert_eq!(req.prompt, "Hello");
        assert_eq!(req.system_prompt.as_deref(), Some("You are helpful"));
        assert_eq!(req.max_tokens, Some(1024));
        assert!(req.thinking);
    }

    #[test]
    fn test_blank_system_prompt_is_dropped() {
        let req = PromptRequest::new("Hello", "m").with_system_prompt("   ");
        assert!(req.system_prompt.is_none());
    }

    #[test]
    fn test_token_usage_estimate() {
        // With ratio 3.0: 300/3 = 100, 150/3 = 50
        let usage = TokenUsage::estimate(300, 150);
        assert_eq!(usage, TokenUsage::new(100, 50));
    }

    #[test]
    fn test_token_usage_add() {
        let mut usage = TokenUsage::new(10, 5);
        usage.add(TokenUsage::new(1, 2));
        assert_eq!(usage.total_tokens, 18);
    }

    #[test]
    fn test_estimate_tokens_counts_chars() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcdef"), 2);
        assert_eq!(estimate_tokens("éé"), 1);
    }

    #[test]
    fn test_context_window_lookup() {
        assert_eq!(context_window_for("claude-sonnet-4-5"), Some(200_000));
        assert_eq!(context_window_for("GPT-4o-mini"), Some(128_000));
        assert_eq!(context_window_for("gpt-4-0613"), Some(8_192));
        assert_eq!(context_window_for("gpt-4-32k-0613"), Some(32_768));
        assert_eq!(context_window_for("gpt-4.5-preview"), Some(128_000));
        assert_eq!(context_window_for("gpt-4-1106-preview"), Some(128_000));
        assert_eq!(context_window_for("local-llama"), None);
    }

    #[test]
    fn test_default_context_window_falls_back_to_capabilities() {
        let provider = MockProvider::new();
        assert_eq!(provider.context_window("unknown-model"), 200_000);
        assert_eq!(provider.context_window("gpt-4o"), 128_000);
    }
}
