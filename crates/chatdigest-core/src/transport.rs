use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::config::TelegramConfig;

/// Telegram rejects longer message bodies.
pub const MAX_MESSAGE_UNITS: usize = 4096;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram rejected message ({status}): {description}")]
    Rejected { status: u16, description: String },
}

/// Outbound side of the chat connector.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, target: &str, text: &str) -> Result<(), TransportError>;
}

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Bot API connector posting to `{api_base}/bot{token}/sendMessage`.
#[derive(Clone)]
pub struct TelegramTransport {
    http: Client,
    api_base: String,
    bot_token: String,
}

impl TelegramTransport {
    pub fn new(http: Client, config: &TelegramConfig) -> Self {
        Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
        }
    }

    pub fn from_config(config: &TelegramConfig) -> Self {
        Self::new(Client::new(), config)
    }

    async fn send_chunk(&self, target: &str, text: &str) -> Result<(), TransportError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let response = self
            .http
            .post(&url)
            .json(&json!({ "chat_id": target, "text": text }))
            .send()
            .await?;

        let status = response.status();
        let body: Option<BotApiResponse> = response.json().await.ok();
        match body {
            Some(body) if status.is_success() && body.ok => Ok(()),
            body => Err(TransportError::Rejected {
                status: status.as_u16(),
                description: body
                    .and_then(|b| b.description)
                    .unwrap_or_else(|| status.to_string()),
            }),
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(&self, target: &str, text: &str) -> Result<(), TransportError> {
        let chunks = split_message(text, MAX_MESSAGE_UNITS);
        debug!(target_chat = target, chunks = chunks.len(), "sending text");
        for chunk in chunks {
            self.send_chunk(target, &chunk).await?;
        }
        Ok(())
    }
}

/// Splits on line boundaries where possible. Lengths are UTF-16 code units, which is
/// how the Bot API counts them. Lines longer than `limit` are cut between chars.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if utf16_len(text) <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for line in text.split_inclusive('\n') {
        let line_len = utf16_len(line);
        if current_len + line_len > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > limit {
            hard_cut(line, limit, &mut chunks);
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

fn hard_cut(line: &str, limit: usize, chunks: &mut Vec<String>) {
    let mut piece = String::new();
    let mut piece_len = 0;
    for ch in line.chars() {
        let ch_len = ch.len_utf16();
        if piece_len + ch_len > limit && !piece.is_empty() {
            chunks.push(std::mem::take(&mut piece));
            piece_len = 0;
        }
        piece.push(ch);
        piece_len += ch_len;
    }
    if !piece.is_empty() {
        chunks.push(piece);
    }
}
