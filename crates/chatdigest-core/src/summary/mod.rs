pub mod context;
pub mod parse;

pub use context::{TRUNCATION_MARKER, build_context, build_prompt};
pub use parse::{ParsedSections, parse_response};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ModelConfig, SummarizerConfig};
use crate::llm::{CompletionRequest, LLMClient, LLMError, LlmCallContext, TokenUsage};
use crate::messages::Message;

pub const SUMMARY_FEATURE: &str = "chat_summary";

/// Work messages of one chat within a run, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatGroup {
    pub chat_id: String,
    pub chat_title: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: String,
    pub chat_title: String,
    pub agreements: Vec<String>,
    pub risks: Vec<String>,
    pub recommendations: Vec<String>,
    pub message_count: usize,
    pub token_usage: TokenUsage,
}

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("chat {0} has no messages to summarize")]
    EmptyGroup(String),
    #[error("summarization failed: {0}")]
    Provider(#[from] LLMError),
}

impl SummarizeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SummarizeError::Provider(err) if err.is_transient())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummarizerSettings {
    pub char_budget: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl SummarizerSettings {
    pub fn from_config(model: &ModelConfig, summarizer: &SummarizerConfig) -> Self {
        Self {
            char_budget: summarizer.char_budget(),
            temperature: model.temperature,
            max_tokens: model.max_output_tokens,
        }
    }
}

/// Turns one chat group into a three-section summary via the completion provider.
/// No retries happen here.
#[derive(Clone)]
pub struct ChatSummarizer {
    llm: Arc<dyn LLMClient>,
    settings: SummarizerSettings,
}

impl ChatSummarizer {
    pub fn new(llm: Arc<dyn LLMClient>, settings: SummarizerSettings) -> Self {
        Self { llm, settings }
    }

    pub async fn summarize(
        &self,
        run_id: &str,
        group: &ChatGroup,
    ) -> Result<ChatSummary, SummarizeError> {
        if group.messages.is_empty() {
            return Err(SummarizeError::EmptyGroup(group.chat_id.clone()));
        }

        let context = build_context(&group.chat_title, &group.messages, self.settings.char_budget);
        let request = CompletionRequest::instruct(
            context::SYSTEM_INSTRUCTION,
            build_prompt(&context),
            self.settings.temperature,
            self.settings.max_tokens,
        );
        let call_context = LlmCallContext::new(SUMMARY_FEATURE)
            .with_run(run_id)
            .with_chat(group.chat_id.as_str());

        let response = self.llm.complete(request, call_context).await?;
        let parsed = parse_response(&response.content);
        if parsed.malformed {
            warn!(
                chat_id = %group.chat_id,
                response_chars = response.content.chars().count(),
                "summary response had no recognizable sections"
            );
        }
        debug!(
            chat_id = %group.chat_id,
            agreements = parsed.agreements.len(),
            risks = parsed.risks.len(),
            recommendations = parsed.recommendations.len(),
            tokens = response.usage().total(),
            "chat summarized"
        );

        Ok(ChatSummary {
            chat_id: group.chat_id.clone(),
            chat_title: group.chat_title.clone(),
            agreements: parsed.agreements,
            risks: parsed.risks,
            recommendations: parsed.recommendations,
            message_count: group.messages.len(),
            token_usage: response.usage(),
        })
    }
}
