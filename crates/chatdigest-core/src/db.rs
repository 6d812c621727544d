use std::{
    env,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use thiserror::Error;

/// Cloneable handle to the message/run database shared by the runner and the API.
#[derive(Clone)]
pub struct Database {
    inner: Arc<LibSqlDatabase>,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to build database: {0}")]
    Build(libsql::Error),
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to open connection: {0}")]
    Connect(libsql::Error),
    #[error("failed to execute statement: {0}")]
    Statement(libsql::Error),
    #[error("missing required LIBSQL_AUTH_TOKEN for remote database")]
    MissingAuthToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Local(PathBuf),
    Remote(String),
}

impl Location {
    fn parse(path: &Path) -> Self {
        let raw = path.to_string_lossy();
        if ["libsql://", "http://", "https://"]
            .iter()
            .any(|scheme| raw.starts_with(scheme))
        {
            Location::Remote(raw.into_owned())
        } else {
            Location::Local(path.to_path_buf())
        }
    }
}

impl Database {
    /// Opens a local file (creating its directory) or a remote `libsql://` database.
    pub async fn new(database_path: &Path) -> Result<Self, DbError> {
        let inner = match Location::parse(database_path) {
            Location::Remote(url) => {
                let auth_token = env::var("LIBSQL_AUTH_TOKEN")
                    .ok()
                    .filter(|token| !token.is_empty())
                    .ok_or(DbError::MissingAuthToken)?;
                Builder::new_remote(url, auth_token).build().await
            }
            Location::Local(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|source| DbError::CreateDir {
                            path: parent.to_path_buf(),
                            source,
                        })?;
                }
                Builder::new_local(path).build().await
            }
        }
        .map_err(DbError::Build)?;

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// New connection with foreign keys enforced.
    pub async fn connection(&self) -> Result<Connection, DbError> {
        let conn = self.inner.connect().map_err(DbError::Connect)?;
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(DbError::Statement)?;
        Ok(conn)
    }

    pub async fn health_check(&self) -> Result<(), DbError> {
        let conn = self.connection().await?;
        let mut rows = conn
            .query("SELECT 1", ())
            .await
            .map_err(DbError::Statement)?;
        rows.next().await.map_err(DbError::Statement)?;
        Ok(())
    }
}

/// Timestamps are stored as millisecond RFC3339 in UTC so that text order is time order.
pub(crate) fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}
