use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use genai::chat::{
    ChatMessage as GenaiChatMessage, ChatOptions, ChatRequest, ChatResponse, MessageContent, Usage,
};
use genai::{Client as GenaiClient, Error as GenaiError, webc};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;
use tracing::{Instrument, debug, info_span, warn};

use super::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, LLMClient, LLMError,
    LlmCallContext, LlmCallRepository, NewLlmCall,
};
use crate::config::ModelConfig;
use crate::db::Database;

/// Seam over `genai::Client::exec_chat` so the client can be driven without a provider.
#[async_trait]
pub trait ChatExecutor: Send + Sync {
    async fn exec_chat(
        &self,
        model: &str,
        request: ChatRequest,
        options: Option<&ChatOptions>,
    ) -> Result<ChatResponse, GenaiError>;
}

#[async_trait]
impl ChatExecutor for GenaiClient {
    async fn exec_chat(
        &self,
        model: &str,
        request: ChatRequest,
        options: Option<&ChatOptions>,
    ) -> Result<ChatResponse, GenaiError> {
        GenaiClient::exec_chat(self, model, request, options).await
    }
}

/// Completion client for any provider genai supports. Every call lands in `llm_calls`.
pub struct GenaiLLMClient {
    executor: Arc<dyn ChatExecutor>,
    model: String,
    calls: LlmCallRepository,
}

impl GenaiLLMClient {
    pub fn new(db: Database, model: &ModelConfig) -> Self {
        Self::with_executor(db, model, Arc::new(GenaiClient::default()))
    }

    pub fn with_executor(db: Database, model: &ModelConfig, executor: Arc<dyn ChatExecutor>) -> Self {
        Self {
            executor,
            model: qualified_model(model),
            calls: LlmCallRepository::new(db),
        }
    }

    /// Model name as passed to genai, e.g. `openai::gpt-4o`.
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn record(&self, call: NewLlmCall) {
        if let Err(err) = self.calls.create(call).await {
            warn!(error = %err, "failed to record llm call");
        }
    }
}

#[async_trait]
impl LLMClient for GenaiLLMClient {
    async fn complete(
        &self,
        request: CompletionRequest,
        context: LlmCallContext,
    ) -> Result<CompletionResponse, LLMError> {
        let span = info_span!(
            "llm_call",
            feature = %context.feature,
            chat_id = context.chat_id.as_deref().unwrap_or("")
        );

        async move {
            let (chat_request, options) = to_genai_request(&request);
            let request_json = serde_json::to_value(&request).unwrap_or(Value::Null);

            let started = Instant::now();
            let result = self
                .executor
                .exec_chat(&self.model, chat_request, Some(&options))
                .await;
            let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let mut call = NewLlmCall {
                context,
                model: self.model.clone(),
                request_json,
                response_json: None,
                input_tokens: None,
                output_tokens: None,
                latency_ms: Some(latency_ms),
                error: None,
            };

            let outcome = match result {
                Ok(response) => {
                    let (input_tokens, output_tokens) = token_counts(&response.usage);
                    let completion = CompletionResponse {
                        content: response.first_text().unwrap_or_default().to_string(),
                        model: response.provider_model_iden.to_string(),
                        input_tokens,
                        output_tokens,
                        latency_ms,
                    };
                    debug!(
                        model = %completion.model,
                        input_tokens,
                        output_tokens,
                        latency_ms,
                        "llm call completed"
                    );
                    call.model = completion.model.clone();
                    call.response_json = serde_json::to_value(&response).ok();
                    call.input_tokens = Some(input_tokens);
                    call.output_tokens = Some(output_tokens);
                    Ok(completion)
                }
                Err(err) => {
                    let err = classify_genai_error(err);
                    warn!(
                        error = %err,
                        kind = err.kind(),
                        transient = err.is_transient(),
                        latency_ms,
                        "llm call failed"
                    );
                    call.error = Some(err.to_string());
                    Err(err)
                }
            };

            self.record(call).await;
            outcome
        }
        .instrument(span)
        .await
    }
}

fn qualified_model(config: &ModelConfig) -> String {
    match config.provider.trim() {
        "" => config.model.clone(),
        provider => format!("{}::{}", provider.to_lowercase(), config.model),
    }
}

fn to_genai_request(request: &CompletionRequest) -> (ChatRequest, ChatOptions) {
    let messages: Vec<GenaiChatMessage> = request.messages.iter().map(to_genai_message).collect();
    let options = ChatOptions::default()
        .with_temperature(f64::from(request.temperature))
        .with_max_tokens(request.max_tokens);
    (ChatRequest::from_messages(messages), options)
}

fn to_genai_message(message: &ChatMessage) -> GenaiChatMessage {
    let content = MessageContent::from_text(message.content.clone());
    match message.role {
        ChatRole::System => GenaiChatMessage::system(content),
        ChatRole::User => GenaiChatMessage::user(content),
        ChatRole::Assistant => GenaiChatMessage::assistant(content),
    }
}

/// Negative or missing counts are reported as zero.
fn token_counts(usage: &Usage) -> (u32, u32) {
    let input = usage.prompt_tokens.unwrap_or_default().max(0) as u32;
    let output = usage.completion_tokens.unwrap_or_default().max(0) as u32;
    (input, output)
}

fn classify_genai_error(err: GenaiError) -> LLMError {
    match err {
        GenaiError::WebAdapterCall { webc_error, .. }
        | GenaiError::WebModelCall { webc_error, .. } => classify_web_error(webc_error),
        GenaiError::RequiresApiKey { .. }
        | GenaiError::NoAuthResolver { .. }
        | GenaiError::NoAuthData { .. } => LLMError::Unauthorized,
        GenaiError::ChatReqHasNoMessages { .. }
        | GenaiError::LastChatMessageIsNotUser { .. }
        | GenaiError::MessageRoleNotSupported { .. }
        | GenaiError::MessageContentTypeNotSupported { .. }
        | GenaiError::AdapterNotSupported { .. }
        | GenaiError::ModelMapperFailed { .. } => LLMError::BadRequest(err.to_string()),
        GenaiError::NoChatResponse { .. } => LLMError::Unavailable(err.to_string()),
        GenaiError::InvalidJsonResponseElement { .. }
        | GenaiError::SerdeJson(_)
        | GenaiError::JsonValueExt(_) => LLMError::Payload(err.to_string()),
        other => LLMError::Other(other.to_string()),
    }
}

fn classify_web_error(err: webc::Error) -> LLMError {
    match &err {
        webc::Error::ResponseFailedStatus {
            status, headers, ..
        } => match *status {
            StatusCode::TOO_MANY_REQUESTS => LLMError::RateLimited {
                retry_after: retry_after(headers, Utc::now()),
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LLMError::Unauthorized,
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => LLMError::Timeout,
            status if status.is_client_error() => LLMError::BadRequest(status.to_string()),
            status if status.is_server_error() => LLMError::Unavailable(status.to_string()),
            status => LLMError::Other(status.to_string()),
        },
        webc::Error::Reqwest(req_err) if req_err.is_timeout() => LLMError::Timeout,
        webc::Error::ResponseFailedNotJson { .. } | webc::Error::JsonValueExt(_) => {
            LLMError::Payload(err.to_string())
        }
        _ => LLMError::Other(err.to_string()),
    }
}

/// `Retry-After` as delay-seconds or an HTTP date.
fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    (at - now).to_std().ok().filter(|delay| !delay.is_zero())
}
