//! Migration history tracking.
//!
//! The `tusk_migrations` table holds one row per applied step. Rows are
//! written inside the migration transaction, so history and schema always
//! move together.

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::{MigrateError, Result};

/// Name of the history table.
pub const HISTORY_TABLE: &str = "tusk_migrations";

/// SQL to create the migrations history table.
pub const CREATE_HISTORY_TABLE_SQL: &str = r"
CREATE TABLE IF NOT EXISTS tusk_migrations (
    id INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at TEXT NOT NULL
)
";

/// A record of an applied step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    /// Step id.
    pub id: i64,
    /// Step description.
    pub description: String,
    /// When the step was applied.
    pub applied_at: DateTime<Utc>,
}

/// Ensures the history table exists.
///
/// # Errors
///
/// Fails when the database returns an error.
pub async fn ensure_table(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(CREATE_HISTORY_TABLE_SQL).execute(conn).await?;
    Ok(())
}

/// Returns true if the history table exists.
///
/// # Errors
///
/// Fails when the database returns an error.
pub async fn table_exists(conn: &mut SqliteConnection) -> Result<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(HISTORY_TABLE)
            .fetch_optional(conn)
            .await?;
    Ok(row.is_some())
}

/// Returns the highest applied step id, if any.
///
/// # Errors
///
/// Fails when the database returns an error.
pub async fn head(conn: &mut SqliteConnection) -> Result<Option<i64>> {
    if !table_exists(&mut *conn).await? {
        return Ok(None);
    }
    let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(id) FROM tusk_migrations")
        .fetch_one(conn)
        .await?;
    Ok(row.0)
}

/// Records a step as applied.
///
/// # Errors
///
/// Fails when the database returns an error, such as a
/// duplicate step id.
pub async fn record(
    conn: &mut SqliteConnection,
    id: i64,
    description: &str,
    applied_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("INSERT INTO tusk_migrations (id, description, applied_at) VALUES (?, ?, ?)")
        .bind(id)
        .bind(description)
        .bind(applied_at.to_rfc3339())
        .execute(conn)
        .await?;
    Ok(())
}

/// Lists applied steps in id order.
///
/// # Errors
///
/// Fails when the database returns an error or a
/// stored timestamp cannot be parsed.
pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<AppliedMigration>> {
    if !table_exists(&mut *conn).await? {
        return Ok(Vec::new());
    }
    let rows: Vec<(i64, String, String)> =
        sqlx::query_as("SELECT id, description, applied_at FROM tusk_migrations ORDER BY id")
            .fetch_all(conn)
            .await?;

    rows.into_iter()
        .map(|(id, description, applied_at)| {
            Ok(AppliedMigration {
                id,
                description,
                applied_at: parse_timestamp(&applied_at)?,
            })
        })
        .collect()
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    // SQLite datetime('now') format
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .map_err(|_| MigrateError::InvalidState(format!("Invalid applied_at timestamp: {text}")))
}
