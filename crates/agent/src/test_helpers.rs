//! Shared test helpers for orchestrator and session tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use docpilot_core::error::{ProviderError, ToolError};
use docpilot_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use docpilot_core::tool::Tool;

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

#[async_trait]
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

/// A provider whose first `fail_first` calls error, then delegates to the
/// scripted queue. Exercises the retry and recovery paths.
pub struct FlakyMockProvider {
    inner: SequentialMockProvider,
    failures_remaining: Mutex<usize>,
}

impl FlakyMockProvider {
    pub fn new(fail_first: usize, texts: &[&str]) -> Self {
        Self {
            inner: SequentialMockProvider::scripted(texts),
            failures_remaining: Mutex::new(fail_first),
        }
    }
}

#[async_trait]
impl Provider for FlakyMockProvider {
    fn name(&self) -> &str {
        "flaky_mock"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        {
            let mut remaining = self.failures_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::Network("simulated outage".into()));
            }
        }
        self.inner.complete(request).await
    }
}

/// A provider that always errors.
pub struct FailingProvider;

#[async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        "failing_mock"
    }

    async fn complete(
        &self,
        _request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Network("provider unavailable".into()))
    }
}

/// A tool that records invocations and replies with fixed text.
pub struct StubTool {
    token: String,
    reply: String,
    calls: AtomicUsize,
    last_input: Mutex<Option<String>>,
}

impl StubTool {
    pub fn new(token: &str, reply: &str) -> Self {
        Self {
            token: token.into(),
            reply: reply.into(),
            calls: AtomicUsize::new(0),
            last_input: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_input(&self) -> Option<String> {
        self.last_input.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for StubTool {
    fn token(&self) -> &str {
        &self.token
    }

    fn description(&self) -> &str {
        "stub tool for tests"
    }

    async fn invoke(&self, input: &str) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().unwrap() = Some(input.to_string());
        Ok(self.reply.clone())
    }
}

/// Convenience: a `Final Answer` action blob.
pub fn final_action(answer: &str) -> String {
    serde_json::json!({"action": "Final Answer", "action_input": answer}).to_string()
}

/// Convenience: a tool action blob.
pub fn tool_action(token: &str, input: &str) -> String {
    serde_json::json!({"action": token, "action_input": input}).to_string()
}
