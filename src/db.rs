//! SQLite pool setup and schema migration.

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr, time::Duration};

/// Schema applied at startup. Every statement is idempotent.
const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Open a pool for `database_url`, creating the file and parent directory if missing.
///
/// In-memory databases live and die with their connection, so they get a
/// single connection that is never recycled.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

    if !in_memory {
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:")
            .trim_start_matches("file:");
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {:?}", parent))?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let opts = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database url `{}`", database_url))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts.journal_mode(SqliteJournalMode::Wal))
            .await?
    };

    tracing::debug!(database_url, in_memory, "SQLite pool ready");
    Ok(pool)
}

/// Run the embedded schema statements one by one.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt)
            .execute(db)
            .await
            .with_context(|| format!("migration statement failed: {}", stmt))?;
    }

    Ok(())
}

/// Return true if SQLx error indicates a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
