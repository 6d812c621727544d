use chrono::{DateTime, Utc};
use libsql::{Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::types::TokenUsage;
use crate::db::{Database, DbError, now_rfc3339, parse_timestamp};

const CALL_COLUMNS: &str = "id, feature, run_id, chat_id, model, request_json, response_json, input_tokens, output_tokens, latency_ms, error, created_at";
const DEFAULT_LIST_LIMIT: i64 = 100;

#[derive(Debug, Error)]
pub enum LlmCallError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("insert returned no row")]
    NoRowReturned,
}

/// What a provider call was made for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LlmCallContext {
    /// Feature name, e.g. "chat_summary".
    pub feature: String,
    pub run_id: Option<String>,
    pub chat_id: Option<String>,
}

impl LlmCallContext {
    pub fn new(feature: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            ..Default::default()
        }
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_chat(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewLlmCall {
    pub context: LlmCallContext,
    pub model: String,
    pub request_json: Value,
    pub response_json: Option<Value>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmCall {
    pub id: String,
    pub context: LlmCallContext,
    pub model: String,
    pub request_json: Value,
    pub response_json: Option<Value>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Provider spend attributed to one run, failed calls included.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunLlmUsage {
    pub calls: u32,
    pub failed_calls: u32,
    pub tokens: TokenUsage,
}

#[derive(Clone)]
pub struct LlmCallRepository {
    db: Database,
}

impl LlmCallRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, call: NewLlmCall) -> Result<LlmCall, LlmCallError> {
        let request_json = serde_json::to_string(&call.request_json)?;
        let response_json = match &call.response_json {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO llm_calls ({CALL_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     RETURNING {CALL_COLUMNS}"
                ),
                params![
                    Uuid::new_v4().to_string(),
                    call.context.feature,
                    call.context.run_id,
                    call.context.chat_id,
                    call.model,
                    request_json,
                    response_json,
                    call.input_tokens.map(i64::from),
                    call.output_tokens.map(i64::from),
                    call.latency_ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)),
                    call.error,
                    now_rfc3339(),
                ],
            )
            .await?;

        let row = rows.next().await?.ok_or(LlmCallError::NoRowReturned)?;
        row_to_call(row)
    }

    /// Most recent calls first, optionally restricted to one feature.
    pub async fn list(
        &self,
        feature: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<LlmCall>, LlmCallError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {CALL_COLUMNS} FROM llm_calls
                     WHERE (?1 IS NULL OR feature = ?1)
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?2"
                ),
                params![feature, limit.unwrap_or(DEFAULT_LIST_LIMIT)],
            )
            .await?;

        let mut calls = Vec::new();
        while let Some(row) = rows.next().await? {
            calls.push(row_to_call(row)?);
        }
        Ok(calls)
    }

    pub async fn usage_for_run(&self, run_id: &str) -> Result<RunLlmUsage, LlmCallError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*),
                        COALESCE(SUM(error IS NOT NULL), 0),
                        COALESCE(SUM(input_tokens), 0),
                        COALESCE(SUM(output_tokens), 0)
                 FROM llm_calls WHERE run_id = ?1",
                params![run_id],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(RunLlmUsage::default());
        };
        let count = |idx: i32| -> Result<u32, LlmCallError> {
            let value: i64 = row.get(idx)?;
            Ok(u32::try_from(value).unwrap_or(u32::MAX))
        };
        Ok(RunLlmUsage {
            calls: count(0)?,
            failed_calls: count(1)?,
            tokens: TokenUsage {
                prompt_tokens: count(2)?,
                completion_tokens: count(3)?,
            },
        })
    }
}

fn row_to_call(row: Row) -> Result<LlmCall, LlmCallError> {
    let request_json: String = row.get(5)?;
    let response_json: Option<String> = row.get(6)?;
    let input_tokens: Option<i64> = row.get(7)?;
    let output_tokens: Option<i64> = row.get(8)?;
    let latency_ms: Option<i64> = row.get(9)?;
    let created_at: String = row.get(11)?;

    Ok(LlmCall {
        id: row.get(0)?,
        context: LlmCallContext {
            feature: row.get(1)?,
            run_id: row.get(2)?,
            chat_id: row.get(3)?,
        },
        model: row.get(4)?,
        request_json: serde_json::from_str(&request_json)?,
        response_json: match response_json {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        },
        input_tokens: input_tokens.and_then(|v| u32::try_from(v).ok()),
        output_tokens: output_tokens.and_then(|v| u32::try_from(v).ok()),
        latency_ms: latency_ms.and_then(|v| u64::try_from(v).ok()),
        error: row.get(10)?,
        created_at: parse_timestamp(&created_at)?,
    })
}
