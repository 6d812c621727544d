use std::time::Duration;

use thiserror::Error;

/// A provider call that produced no usable reply. A reply that arrives but does
/// not follow the requested layout is not an error at this level.
#[derive(Debug, Error)]
pub enum LLMError {
    #[error("rate limited{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },
    #[error("provider rejected credentials")]
    Unauthorized,
    #[error("request rejected: {0}")]
    BadRequest(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("timed out")]
    Timeout,
    #[error("unreadable provider payload: {0}")]
    Payload(String),
    #[error("provider error: {0}")]
    Other(String),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(delay) => format!(" (retry after {}ms)", delay.as_millis()),
        None => String::new(),
    }
}

impl LLMError {
    /// Short stable label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LLMError::RateLimited { .. } => "rate_limited",
            LLMError::Unauthorized => "unauthorized",
            LLMError::BadRequest(_) => "bad_request",
            LLMError::Unavailable(_) => "unavailable",
            LLMError::Timeout => "timeout",
            LLMError::Payload(_) => "payload",
            LLMError::Other(_) => "other",
        }
    }

    /// True when the same request may succeed on a later run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LLMError::RateLimited { .. } | LLMError::Unavailable(_) | LLMError::Timeout
        )
    }
}
