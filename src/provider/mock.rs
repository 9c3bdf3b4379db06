//! Mock provider for testing
//!
//! Returns scripted replies without making real API calls.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Capabilities, PromptRequest, PromptResponse, Provider, TokenUsage};
use crate::error::{AnalysisError, Result};

/// One scripted reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Successful response with this content
    Text(String),
    /// API-level failure response (`success == false`)
    Failure(String),
    /// Transport error
    Error(String),
}

/// Mock provider that returns predefined responses
///
/// Clones share the reply queue and the request log.
#[derive(Clone)]
pub struct MockProvider {
    /// Queue of replies to return (FIFO)
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    /// Reply when the queue is empty
    default_response: String,
    /// Every request made (for assertions)
    requests: Arc<Mutex<Vec<PromptRequest>>>,
    /// Prompts containing any of these fail
    fail_on: Vec<String>,
    /// Returned as reasoning when a request asks for thinking
    reasoning: Option<String>,
    delay: Option<Duration>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            default_response: "Mock response".to_string(),
            requests: Arc::new(Mutex::new(Vec::new())),
            fail_on: Vec::new(),
            reasoning: None,
            delay: None,
        }
    }

    /// Create with a queue of successful responses
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provider = Self::new();
        for response in responses {
            provider.queue(MockReply::Text(response.into()));
        }
        provider
    }

    pub fn with_default(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    /// Fail every prompt that contains `marker`
    pub fn fail_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_on.push(marker.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Sleep before answering (cancellation tests)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queue(&self, reply: MockReply) {
        self.replies.lock().push_back(reply);
    }

    pub fn requests(&self) -> Vec<PromptRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn last_request(&self) -> Option<PromptRequest> {
        self.requests.lock().last().cloned()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::mock()
    }

    async fn generate(&self, request: PromptRequest) -> Result<PromptResponse> {
        self.requests.lock().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(marker) = self.fail_on.iter().find(|m| request.prompt.contains(m.as_str())) {
            return Ok(PromptResponse::failure(format!(
                "mock failure triggered by '{}'",
                marker
            )));
        }

        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| MockReply::Text(self.default_response.clone()));

        match reply {
            MockReply::Text(text) => {
                let usage = TokenUsage::estimate(request.prompt.len(), text.len());
                let reasoning = if request.thinking {
                    self.reasoning.clone()
                } else {
                    None
                };
                Ok(PromptResponse::success(text)
                    .with_usage(usage)
                    .with_reasoning(reasoning))
            }
            MockReply::Failure(message) => Ok(PromptResponse::failure(message)),
            MockReply::Error(message) => Err(AnalysisError::ProviderApiError { message }),
        }
    }
}
