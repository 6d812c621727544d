use std::sync::Arc;

use chatdigest_core::migrations::run_migrations;
use chatdigest_core::{
    Classifier, Database, MessageRepository, NewMessage, RuleKind, RuleRepository,
    ingest_message,
};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

async fn setup() -> (Database, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let db_name = format!("db_{}.sqlite", uuid::Uuid::new_v4());
    let db = Database::new(&dir.path().join(db_name))
        .await
        .expect("create db");
    run_migrations(&db).await.expect("migrations");
    (db, dir)
}

async fn load(db: &Database) -> Classifier {
    Classifier::load(Arc::new(RuleRepository::new(db.clone())))
        .await
        .expect("classifier")
}

#[tokio::test]
async fn rules_survive_a_restart() {
    let (db, _dir) = setup().await;
    let classifier = load(&db).await;
    classifier.add_deny_chat("-5").await.expect("deny");
    classifier.add_keyword("  Тендер ").await.expect("keyword");
    assert_eq!(classifier.snapshot().version(), 3);

    let restarted = load(&db).await;
    let listing = restarted.list_filters().await.expect("listing");
    assert_eq!(listing.deny_chats, vec!["-5"]);
    assert_eq!(listing.keywords, vec!["тендер"]);
    assert!(!restarted.is_work_chat("-5", "Проект Альфа"));
    assert!(restarted.is_work_chat("-6", "ТЕНДЕР 2024"));
    assert_eq!(restarted.snapshot().version(), 1);
}

#[tokio::test]
async fn ingest_uses_rules_as_of_arrival() {
    let (db, _dir) = setup().await;
    let classifier = load(&db).await;
    let messages = MessageRepository::new(db.clone());
    let incoming = |external_id: &str| NewMessage {
        chat_id: "-42".into(),
        chat_title: Some("Проект Альфа".into()),
        chat_type: Some("supergroup".into()),
        external_id: external_id.into(),
        sender: Some("Олег".into()),
        text: "созвон в пятницу".into(),
        timestamp: Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap(),
        raw: None,
    };

    let first = ingest_message(&messages, &classifier, &incoming("1"))
        .await
        .expect("first ingest");
    assert!(first.chat_is_work);

    classifier
        .add_rule(RuleKind::DenyChat, "-42")
        .await
        .expect("deny");
    let second = ingest_message(&messages, &classifier, &incoming("2"))
        .await
        .expect("second ingest");
    assert!(!second.chat_is_work);
    let chat = messages
        .get_chat("-42")
        .await
        .expect("get chat")
        .expect("chat row");
    assert!(!chat.is_work);
    assert_eq!(chat.last_seen_message_id.as_deref(), Some("2"));

    assert!(
        classifier
            .remove_rule(RuleKind::DenyChat, "-42")
            .await
            .expect("remove")
    );
    let third = ingest_message(&messages, &classifier, &incoming("3"))
        .await
        .expect("third ingest");
    assert!(third.chat_is_work);
    assert_eq!(messages.list_work_chats().await.expect("work chats").len(), 1);
}
