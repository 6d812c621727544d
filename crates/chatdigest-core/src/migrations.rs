use std::collections::HashSet;

use libsql::{Connection, params};
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{Database, DbError, now_rfc3339};

/// One schema step, applied inside its own transaction and recorded by version.
struct Migration {
    version: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: "001_initial",
    sql: include_str!("../../../migrations/001_initial.sql"),
}];

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("migration failed: {0}")]
    LibSql(#[from] libsql::Error),
}

/// Brings the schema up to date. Safe to call on every start.
pub async fn run_migrations(db: &Database) -> Result<(), MigrationError> {
    let conn = db.connection().await?;
    apply_migrations(&conn, MIGRATIONS).await
}

async fn apply_migrations(conn: &Connection, migrations: &[Migration]) -> Result<(), MigrationError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        (),
    )
    .await?;

    let applied = applied_versions(conn).await?;
    let known: HashSet<&str> = migrations.iter().map(|m| m.version).collect();
    for version in applied.iter().filter(|v| !known.contains(v.as_str())) {
        warn!(version = %version, "database has a migration this build does not know");
    }

    for migration in migrations.iter().filter(|m| !applied.contains(m.version)) {
        apply_one(conn, migration).await?;
        info!(version = migration.version, "applied migration");
    }
    Ok(())
}

async fn applied_versions(conn: &Connection) -> Result<HashSet<String>, MigrationError> {
    let mut rows = conn.query("SELECT version FROM schema_migrations", ()).await?;
    let mut versions = HashSet::new();
    while let Some(row) = rows.next().await? {
        versions.insert(row.get::<String>(0)?);
    }
    Ok(versions)
}

/// Dropping the transaction on error rolls the step back.
async fn apply_one(conn: &Connection, migration: &Migration) -> Result<(), MigrationError> {
    let tx = conn.transaction().await?;
    tx.execute_batch(migration.sql).await?;
    tx.execute(
        "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        params![migration.version, now_rfc3339()],
    )
    .await?;
    tx.commit().await?;
    Ok(())
}
