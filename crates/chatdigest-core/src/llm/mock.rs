use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LLMClient, LLMError, LlmCallContext};

/// Scripted client that replays queued responses and records what it was asked.
#[derive(Debug, Default, Clone)]
pub struct MockLLMClient {
    responses: Arc<Mutex<VecDeque<Result<CompletionResponse, LLMError>>>>,
    requests: Arc<Mutex<Vec<(CompletionRequest, LlmCallContext)>>>,
    call_count: Arc<AtomicUsize>,
}

impl MockLLMClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_response(&self, response: Result<CompletionResponse, LLMError>) {
        let mut guard = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        guard.push_back(response);
    }

    /// Queues a successful completion with the given text and token counts.
    pub fn enqueue_text(&self, content: impl Into<String>, input_tokens: u32, output_tokens: u32) {
        self.enqueue_response(Ok(CompletionResponse {
            content: content.into(),
            model: "mock::model".into(),
            input_tokens,
            output_tokens,
            latency_ms: 1,
        }));
    }

    /// Returns the number of times `complete` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(CompletionRequest, LlmCallContext)> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    async fn complete(
        &self,
        request: CompletionRequest,
        context: LlmCallContext,
    ) -> Result<CompletionResponse, LLMError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((request, context));
        let mut guard = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        guard.pop_front().unwrap_or_else(|| {
            Err(LLMError::Other(
                "mock response not provided".to_string(),
            ))
        })
    }
}
