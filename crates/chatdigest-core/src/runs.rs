use chrono::{DateTime, Duration, Utc};
use libsql::{Row, params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{Database, now_rfc3339, parse_timestamp, to_rfc3339};
use crate::llm::TokenUsage;
use crate::store::StoreError;
use crate::summary::ChatSummary;

const RUN_COLUMNS: &str = "id, trigger_kind, triggered_at, window_start, window_end, status, error, created_at, finished_at";
const SUMMARY_COLUMNS: &str = "chat_id, chat_title, agreements_json, risks_json, recommendations_json, message_count, prompt_tokens, completion_tokens";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Scheduled,
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::Manual => "manual",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(Self::Scheduled),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AnalysisWindow {
    pub fn ending_at(end: DateTime<Utc>, length: Duration) -> Self {
        Self {
            start: end - length,
            end,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub trigger: TriggerKind,
    pub triggered_at: DateTime<Utc>,
    pub window: AnalysisWindow,
    pub status: RunStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct RunRepository {
    db: Database,
}

impl RunRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        trigger: TriggerKind,
        triggered_at: DateTime<Utc>,
        window: &AnalysisWindow,
    ) -> Result<Run, StoreError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO runs (id, trigger_kind, triggered_at, window_start, window_end, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     RETURNING {RUN_COLUMNS}"
                ),
                params![
                    Uuid::new_v4().to_string(),
                    trigger.as_str(),
                    to_rfc3339(triggered_at),
                    to_rfc3339(window.start),
                    to_rfc3339(window.end),
                    RunStatus::Running.as_str(),
                    now_rfc3339()
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_run(row),
            None => Err(StoreError::NotFound("run insert failed".into())),
        }
    }

    /// Moves a running run to its final status. Finished runs are left untouched.
    pub async fn finish(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<Run, StoreError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "UPDATE runs SET status = ?2, error = ?3, finished_at = ?4
                     WHERE id = ?1 AND status = 'running'
                     RETURNING {RUN_COLUMNS}"
                ),
                params![run_id, status.as_str(), error, now_rfc3339()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_run(row),
            None => Err(StoreError::NotFound(run_id.to_string())),
        }
    }

    /// Fails runs left `running` by a previous process. Returns how many were closed.
    pub async fn fail_interrupted(&self) -> Result<u64, StoreError> {
        let conn = self.db.connection().await?;
        let closed = conn
            .execute(
                "UPDATE runs SET status = ?1, error = ?2, finished_at = ?3 WHERE status = 'running'",
                params![RunStatus::Failed.as_str(), "interrupted", now_rfc3339()],
            )
            .await?;
        Ok(closed)
    }

    pub async fn get(&self, run_id: &str) -> Result<Run, StoreError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                params![run_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_run(row),
            None => Err(StoreError::NotFound(run_id.to_string())),
        }
    }

    pub async fn latest(&self) -> Result<Option<Run>, StoreError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {RUN_COLUMNS} FROM runs ORDER BY triggered_at DESC, rowid DESC LIMIT 1"),
                (),
            )
            .await?;

        rows.next().await?.map(row_to_run).transpose()
    }

    pub async fn record_chat_summary(
        &self,
        run_id: &str,
        summary: &ChatSummary,
    ) -> Result<(), StoreError> {
        let conn = self.db.connection().await?;
        conn.execute(
            "INSERT INTO chat_summaries (
                id, run_id, chat_id, chat_title, agreements_json, risks_json, recommendations_json,
                message_count, prompt_tokens, completion_tokens, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                Uuid::new_v4().to_string(),
                run_id,
                summary.chat_id.as_str(),
                summary.chat_title.as_str(),
                serde_json::to_string(&summary.agreements)?,
                serde_json::to_string(&summary.risks)?,
                serde_json::to_string(&summary.recommendations)?,
                summary.message_count as i64,
                summary.token_usage.prompt_tokens as i64,
                summary.token_usage.completion_tokens as i64,
                now_rfc3339()
            ],
        )
        .await?;
        Ok(())
    }

    /// Summaries of a run in the order they were recorded.
    pub async fn list_summaries(&self, run_id: &str) -> Result<Vec<ChatSummary>, StoreError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {SUMMARY_COLUMNS} FROM chat_summaries WHERE run_id = ?1 ORDER BY rowid"
                ),
                params![run_id],
            )
            .await?;

        let mut summaries = Vec::new();
        while let Some(row) = rows.next().await? {
            summaries.push(row_to_summary(row)?);
        }
        Ok(summaries)
    }
}

fn row_to_run(row: Row) -> Result<Run, StoreError> {
    let trigger: String = row.get(1)?;
    let triggered_at: String = row.get(2)?;
    let window_start: String = row.get(3)?;
    let window_end: String = row.get(4)?;
    let status: String = row.get(5)?;
    let created_at: String = row.get(7)?;
    let finished_at: Option<String> = row.get(8)?;

    Ok(Run {
        id: row.get(0)?,
        trigger: TriggerKind::from_str(&trigger)
            .ok_or_else(|| StoreError::InvalidValue(format!("trigger_kind {trigger}")))?,
        triggered_at: parse_timestamp(&triggered_at)?,
        window: AnalysisWindow {
            start: parse_timestamp(&window_start)?,
            end: parse_timestamp(&window_end)?,
        },
        status: RunStatus::from_str(&status)
            .ok_or_else(|| StoreError::InvalidValue(format!("status {status}")))?,
        error: row.get(6)?,
        created_at: parse_timestamp(&created_at)?,
        finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn row_to_summary(row: Row) -> Result<ChatSummary, StoreError> {
    let agreements: String = row.get(2)?;
    let risks: String = row.get(3)?;
    let recommendations: String = row.get(4)?;
    let message_count: i64 = row.get(5)?;
    let prompt_tokens: i64 = row.get(6)?;
    let completion_tokens: i64 = row.get(7)?;

    Ok(ChatSummary {
        chat_id: row.get(0)?,
        chat_title: row.get(1)?,
        agreements: serde_json::from_str(&agreements)?,
        risks: serde_json::from_str(&risks)?,
        recommendations: serde_json::from_str(&recommendations)?,
        message_count: message_count.max(0) as usize,
        token_usage: TokenUsage {
            prompt_tokens: prompt_tokens.max(0) as u32,
            completion_tokens: completion_tokens.max(0) as u32,
        },
    })
}
