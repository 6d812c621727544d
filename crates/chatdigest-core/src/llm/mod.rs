pub mod error;
pub mod mock;
pub mod provider;
pub mod repository;
pub mod types;

pub use error::LLMError;
pub use mock::MockLLMClient;
pub use provider::{ChatExecutor, GenaiLLMClient};
pub use repository::{
    LlmCall, LlmCallContext, LlmCallError, LlmCallRepository, NewLlmCall, RunLlmUsage,
};
pub use types::{ChatMessage, ChatRole, CompletionRequest, CompletionResponse, TokenUsage};

use async_trait::async_trait;

/// Text-in, text-out completion provider.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn complete(
        &self,
        request: CompletionRequest,
        context: LlmCallContext,
    ) -> Result<CompletionResponse, LLMError>;
}
