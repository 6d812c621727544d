use chrono::{DateTime, Utc};
use libsql::{Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{Database, now_rfc3339, parse_timestamp, to_rfc3339};
use crate::runs::AnalysisWindow;
use crate::store::StoreError;

const CHAT_COLUMNS: &str =
    "chat_id, title, chat_type, is_work, last_seen_message_id, created_at, updated_at";
const WINDOW_COLUMNS: &str =
    "m.id, m.chat_id, m.external_id, m.sender, m.text, m.ts, c.title, c.is_work";

pub const UNKNOWN_SENDER: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub chat_id: String,
    pub title: String,
    pub chat_type: Option<String>,
    pub is_work: bool,
    pub last_seen_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored chat message joined with what is known about its chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub external_id: String,
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub chat_title: String,
    pub chat_is_work: bool,
}

/// Inbound message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub chat_id: String,
    #[serde(default)]
    pub chat_title: Option<String>,
    #[serde(default)]
    pub chat_type: Option<String>,
    pub external_id: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub raw: Option<Value>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidMessage {
    #[error("missing required field {0}")]
    MissingField(&'static str),
}

impl NewMessage {
    pub fn validate(&self) -> Result<(), InvalidMessage> {
        if self.chat_id.trim().is_empty() {
            return Err(InvalidMessage::MissingField("chat_id"));
        }
        if self.external_id.trim().is_empty() {
            return Err(InvalidMessage::MissingField("external_id"));
        }
        Ok(())
    }

    pub fn resolved_title(&self) -> String {
        match self.chat_title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => format!("Chat {}", self.chat_id),
        }
    }

    pub fn resolved_sender(&self) -> String {
        match self.sender.as_deref().map(str::trim) {
            Some(sender) if !sender.is_empty() => sender.to_string(),
            _ => UNKNOWN_SENDER.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct MessageRepository {
    db: Database,
}

impl MessageRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn upsert_chat(
        &self,
        chat_id: &str,
        title: &str,
        chat_type: Option<&str>,
        is_work: bool,
    ) -> Result<Chat, StoreError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO chats (chat_id, title, chat_type, is_work, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                     ON CONFLICT(chat_id) DO UPDATE SET
                        title = excluded.title,
                        chat_type = COALESCE(excluded.chat_type, chats.chat_type),
                        is_work = excluded.is_work,
                        updated_at = excluded.updated_at
                     RETURNING {CHAT_COLUMNS}"
                ),
                params![chat_id, title, chat_type, is_work as i64, now_rfc3339()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_chat(row),
            None => Err(StoreError::NotFound(chat_id.to_string())),
        }
    }

    /// Stores the message unless `(chat_id, external_id)` was seen before.
    /// Returns the new row id, or `None` for a duplicate delivery.
    pub async fn insert_message(&self, msg: &NewMessage) -> Result<Option<String>, StoreError> {
        let raw_json = msg.raw.as_ref().map(serde_json::to_string).transpose()?;
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "INSERT INTO messages (id, chat_id, external_id, sender, text, ts, raw_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(chat_id, external_id) DO NOTHING
                 RETURNING id",
                params![
                    Uuid::new_v4().to_string(),
                    msg.chat_id.as_str(),
                    msg.external_id.as_str(),
                    msg.resolved_sender(),
                    msg.text.as_str(),
                    to_rfc3339(msg.timestamp),
                    raw_json,
                    now_rfc3339()
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub async fn mark_seen(&self, chat_id: &str, external_id: &str) -> Result<(), StoreError> {
        let conn = self.db.connection().await?;
        conn.execute(
            "UPDATE chats SET last_seen_message_id = ?2, updated_at = ?3 WHERE chat_id = ?1",
            params![chat_id, external_id, now_rfc3339()],
        )
        .await?;
        Ok(())
    }

    pub async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>, StoreError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE chat_id = ?1"),
                params![chat_id],
            )
            .await?;

        rows.next().await?.map(row_to_chat).transpose()
    }

    pub async fn list_work_chats(&self) -> Result<Vec<Chat>, StoreError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE is_work = 1 ORDER BY title, chat_id"),
                (),
            )
            .await?;

        let mut chats = Vec::new();
        while let Some(row) = rows.next().await? {
            chats.push(row_to_chat(row)?);
        }
        Ok(chats)
    }

    /// Messages inside the half-open window, oldest first. Ties on the timestamp keep
    /// insertion order.
    pub async fn fetch_window(&self, window: &AnalysisWindow) -> Result<Vec<Message>, StoreError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {WINDOW_COLUMNS}
                     FROM messages m
                     JOIN chats c ON c.chat_id = m.chat_id
                     WHERE m.ts >= ?1 AND m.ts < ?2
                     ORDER BY m.ts ASC, m.rowid ASC"
                ),
                params![to_rfc3339(window.start), to_rfc3339(window.end)],
            )
            .await?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            messages.push(row_to_message(row)?);
        }
        Ok(messages)
    }
}

fn row_to_chat(row: Row) -> Result<Chat, StoreError> {
    let is_work: i64 = row.get(3)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    Ok(Chat {
        chat_id: row.get(0)?,
        title: row.get(1)?,
        chat_type: row.get(2)?,
        is_work: is_work != 0,
        last_seen_message_id: row.get(4)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_message(row: Row) -> Result<Message, StoreError> {
    let ts: String = row.get(5)?;
    let is_work: i64 = row.get(7)?;

    Ok(Message {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        external_id: row.get(2)?,
        sender: row.get(3)?,
        text: row.get(4)?,
        timestamp: parse_timestamp(&ts)?,
        chat_title: row.get(6)?,
        chat_is_work: is_work != 0,
    })
}
