use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::{Database, DbError};
use crate::messages::{Chat, Message, MessageRepository};
use crate::rules::{Rule, RuleKind, RuleStoreError};
use crate::runs::{AnalysisWindow, Run, RunRepository, RunStatus, TriggerKind};
use crate::summary::ChatSummary;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("invalid stored value {0}")]
    InvalidValue(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Durable message and run storage as seen by the runner.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages with `start <= ts < end`, oldest first.
    async fn fetch_window(&self, window: &AnalysisWindow) -> Result<Vec<Message>, StoreError>;

    async fn list_work_chats(&self) -> Result<Vec<Chat>, StoreError>;

    async fn record_run(
        &self,
        trigger: TriggerKind,
        triggered_at: DateTime<Utc>,
        window: &AnalysisWindow,
    ) -> Result<Run, StoreError>;

    async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn record_chat_summary(
        &self,
        run_id: &str,
        summary: &ChatSummary,
    ) -> Result<(), StoreError>;
}

/// Persistence for allow/deny/keyword rules. A `(kind, value)` pair is stored at most once.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_rules(&self, kind: Option<RuleKind>) -> Result<Vec<Rule>, RuleStoreError>;

    async fn upsert_rule(&self, kind: RuleKind, value: &str) -> Result<Rule, RuleStoreError>;

    /// Returns whether a rule was removed.
    async fn remove_rule(&self, kind: RuleKind, value: &str) -> Result<bool, RuleStoreError>;
}

/// `MessageStore` backed by the libsql tables.
#[derive(Clone)]
pub struct LibsqlStore {
    messages: MessageRepository,
    runs: RunRepository,
}

impl LibsqlStore {
    pub fn new(db: Database) -> Self {
        Self {
            messages: MessageRepository::new(db.clone()),
            runs: RunRepository::new(db),
        }
    }

    pub fn messages(&self) -> &MessageRepository {
        &self.messages
    }

    pub fn runs(&self) -> &RunRepository {
        &self.runs
    }
}

#[async_trait]
impl MessageStore for LibsqlStore {
    async fn fetch_window(&self, window: &AnalysisWindow) -> Result<Vec<Message>, StoreError> {
        self.messages.fetch_window(window).await
    }

    async fn list_work_chats(&self) -> Result<Vec<Chat>, StoreError> {
        self.messages.list_work_chats().await
    }

    async fn record_run(
        &self,
        trigger: TriggerKind,
        triggered_at: DateTime<Utc>,
        window: &AnalysisWindow,
    ) -> Result<Run, StoreError> {
        self.runs.create(trigger, triggered_at, window).await
    }

    async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.runs.finish(run_id, status, error).await.map(|_| ())
    }

    async fn record_chat_summary(
        &self,
        run_id: &str,
        summary: &ChatSummary,
    ) -> Result<(), StoreError> {
        self.runs.record_chat_summary(run_id, summary).await
    }
}
