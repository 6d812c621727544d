use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::messages::{InvalidMessage, MessageRepository, NewMessage};
use crate::rules::Classifier;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid message: {0}")]
    Invalid(#[from] InvalidMessage),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    /// `None` when the message had already been stored.
    pub message_id: Option<String>,
    pub chat_is_work: bool,
}

/// Persists one inbound message. The chat's work flag is re-evaluated on every message
/// so rule changes show up in `list_work_chats` as chats keep talking.
pub async fn ingest_message(
    messages: &MessageRepository,
    classifier: &Classifier,
    message: &NewMessage,
) -> Result<IngestOutcome, IngestError> {
    message.validate()?;

    let title = message.resolved_title();
    let is_work = classifier.is_work_chat(&message.chat_id, &title);
    messages
        .upsert_chat(&message.chat_id, &title, message.chat_type.as_deref(), is_work)
        .await?;

    let message_id = messages.insert_message(message).await?;
    if message_id.is_some() {
        messages
            .mark_seen(&message.chat_id, &message.external_id)
            .await?;
    }
    debug!(
        chat_id = %message.chat_id,
        external_id = %message.external_id,
        duplicate = message_id.is_none(),
        chat_is_work = is_work,
        "message ingested"
    );

    Ok(IngestOutcome {
        message_id,
        chat_is_work: is_work,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::migrations::run_migrations;
    use crate::rules::RuleRepository;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn setup() -> (MessageRepository, Classifier, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let db_name = format!("db_{}.sqlite", Uuid::new_v4());
        let db = Database::new(&dir.path().join(db_name))
            .await
            .expect("create db");
        run_migrations(&db).await.expect("migrations");
        let classifier = Classifier::load(Arc::new(RuleRepository::new(db.clone())))
            .await
            .expect("classifier");
        (MessageRepository::new(db), classifier, dir)
    }

    fn inbound(chat_id: &str, external_id: &str, title: Option<&str>) -> NewMessage {
        NewMessage {
            chat_id: chat_id.into(),
            chat_title: title.map(str::to_string),
            chat_type: Some("group".into()),
            external_id: external_id.into(),
            sender: None,
            text: "смета готова".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 6, 11, 15, 0).unwrap(),
            raw: None,
        }
    }

    #[tokio::test]
    async fn ingest_flags_chat_and_skips_duplicates() {
        let (messages, classifier, _dir) = setup().await;

        let first = ingest_message(&messages, &classifier, &inbound("-100", "1", Some("Проект Альфа")))
            .await
            .expect("ingest");
        assert!(first.message_id.is_some());
        assert!(first.chat_is_work, "title keyword marks the chat as work");

        let again = ingest_message(&messages, &classifier, &inbound("-100", "1", Some("Проект Альфа")))
            .await
            .expect("ingest duplicate");
        assert_eq!(again.message_id, None);

        let chat = messages.get_chat("-100").await.expect("get").expect("chat");
        assert_eq!(chat.last_seen_message_id.as_deref(), Some("1"));
        let work = messages.list_work_chats().await.expect("work chats");
        assert_eq!(work.len(), 1);
    }

    #[tokio::test]
    async fn missing_title_and_sender_get_defaults() {
        let (messages, classifier, _dir) = setup().await;

        let outcome = ingest_message(&messages, &classifier, &inbound("77", "9", None))
            .await
            .expect("ingest");
        assert!(!outcome.chat_is_work);

        let chat = messages.get_chat("77").await.expect("get").expect("chat");
        assert_eq!(chat.title, "Chat 77");
    }

    #[tokio::test]
    async fn blank_chat_id_is_rejected() {
        let (messages, classifier, _dir) = setup().await;

        let err = ingest_message(&messages, &classifier, &inbound(" ", "1", None))
            .await
            .expect_err("invalid");
        assert!(matches!(err, IngestError::Invalid(InvalidMessage::MissingField("chat_id"))));
    }
}
