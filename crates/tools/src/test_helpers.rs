//! Shared test helpers for tool tests.

use std::sync::Mutex;

use docpilot_core::error::ProviderError;
use docpilot_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue.
/// Panics if more calls are made than responses provided.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<String>>,
    call_count: Mutex<usize>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: Mutex::new(0),
        }
    }

    /// Script a sequence of raw completion texts.
    pub fn scripted(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| t.to_string()).collect())
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

/// Convenience: a `Final Answer` action blob.
pub fn final_action(answer: &str) -> String {
    serde_json::json!({"action": "Final Answer", "action_input": answer}).to_string()
}

/// Convenience: a tool/sub-action blob.
pub fn tool_action(token: &str, input: serde_json::Value) -> String {
    serde_json::json!({"action": token, "action_input": input}).to_string()
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(
        &self,
        _request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut count = self.call_count.lock().unwrap();
        let responses = self.responses.lock().unwrap();

        if *count >= responses.len() {
            panic!(
                "SequentialMockProvider: no more responses (call #{}, have {})",
                *count,
                responses.len()
            );
        }

        let content = responses[*count].clone();
        *count += 1;

        Ok(ProviderResponse {
            content,
            model: "mock-model".into(),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        })
    }
}

