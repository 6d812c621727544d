use async_trait::async_trait;
use libsql::{Row, params};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{Database, DbError, now_rfc3339, parse_timestamp};
use crate::store::RuleStore;

use super::types::{Rule, RuleKind};

const RULE_COLUMNS: &str = "id, kind, value, created_at";

#[derive(Debug, Error)]
pub enum RuleStoreError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("invalid rule kind {0}")]
    InvalidKind(String),
    #[error("rule value must not be empty")]
    EmptyValue,
    #[error("rule not found: {0}")]
    NotFound(String),
}

#[derive(Clone)]
pub struct RuleRepository {
    db: Database,
}

impl RuleRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn upsert(&self, kind: RuleKind, value: &str) -> Result<Rule, RuleStoreError> {
        let value = kind.normalize(value);
        if value.is_empty() {
            return Err(RuleStoreError::EmptyValue);
        }

        let conn = self.db.connection().await?;
        // Re-adding an existing rule refreshes its timestamp instead of duplicating it.
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO rules (id, kind, value, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(kind, value) DO UPDATE SET created_at = excluded.created_at
                     RETURNING {RULE_COLUMNS}"
                ),
                params![
                    Uuid::new_v4().to_string(),
                    kind.as_str(),
                    value.clone(),
                    now_rfc3339()
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_rule(row),
            None => Err(RuleStoreError::NotFound(value)),
        }
    }

    pub async fn list(&self, kind: Option<RuleKind>) -> Result<Vec<Rule>, RuleStoreError> {
        let conn = self.db.connection().await?;
        let mut rows = match kind {
            Some(kind) => {
                conn.query(
                    &format!(
                        "SELECT {RULE_COLUMNS} FROM rules WHERE kind = ?1 ORDER BY created_at, rowid"
                    ),
                    params![kind.as_str()],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!("SELECT {RULE_COLUMNS} FROM rules ORDER BY created_at, rowid"),
                    (),
                )
                .await?
            }
        };

        let mut rules = Vec::new();
        while let Some(row) = rows.next().await? {
            rules.push(row_to_rule(row)?);
        }
        Ok(rules)
    }

    pub async fn delete(&self, kind: RuleKind, value: &str) -> Result<bool, RuleStoreError> {
        let conn = self.db.connection().await?;
        let affected = conn
            .execute(
                "DELETE FROM rules WHERE kind = ?1 AND value = ?2",
                params![kind.as_str(), kind.normalize(value)],
            )
            .await?;
        Ok(affected > 0)
    }
}

#[async_trait]
impl RuleStore for RuleRepository {
    async fn list_rules(&self, kind: Option<RuleKind>) -> Result<Vec<Rule>, RuleStoreError> {
        self.list(kind).await
    }

    async fn upsert_rule(&self, kind: RuleKind, value: &str) -> Result<Rule, RuleStoreError> {
        self.upsert(kind, value).await
    }

    async fn remove_rule(&self, kind: RuleKind, value: &str) -> Result<bool, RuleStoreError> {
        self.delete(kind, value).await
    }
}

fn row_to_rule(row: Row) -> Result<Rule, RuleStoreError> {
    let kind: String = row.get(1)?;
    let created_at: String = row.get(3)?;

    Ok(Rule {
        id: row.get(0)?,
        kind: RuleKind::from_str(&kind).ok_or(RuleStoreError::InvalidKind(kind.clone()))?,
        value: row.get(2)?,
        created_at: parse_timestamp(&created_at)?,
    })
}
