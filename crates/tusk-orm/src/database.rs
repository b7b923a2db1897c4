//! SQLite connection provider and the sqlx-backed executor.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite};
use tracing::{debug, info};

use crate::backend::Backend;
use crate::error::{OrmError, Result};
use crate::statement::CompiledStatement;
use crate::value::{SqlValue, ValueKind};

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite://app.db` or `sqlite::memory:`.
    pub url: String,
    /// Connections kept open while idle.
    pub min_connections: u32,
    /// Upper bound on open connections.
    pub max_connections: u32,
    /// How long a caller waits for a free connection before `PoolTimeout`.
    pub acquire_timeout: Duration,
    /// Per-statement deadline; `None` waits indefinitely.
    pub statement_timeout: Option<Duration>,
}

impl DatabaseConfig {
    /// Creates a configuration with default pool limits.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            min_connections: 0,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            statement_timeout: None,
        }
    }

    /// Set the minimum connections.
    #[must_use]
    pub const fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Set the maximum connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the acquire timeout.
    #[must_use]
    pub const fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the statement timeout.
    #[must_use]
    pub const fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Returns true for in-memory databases.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new("sqlite::memory:")
    }
}

/// A pooled SQLite database.
///
/// Every round trip acquires one connection and returns it when the
/// statement completes, fails, times out or is cancelled.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    statement_timeout: Option<Duration>,
}

impl Database {
    /// Opens a pool. The database file is created if missing.
    ///
    /// In-memory databases live inside a single connection, so their pool is
    /// capped at one connection that is never recycled.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` for a malformed URL or a database that
    /// cannot be opened.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| OrmError::ConnectionError(e.to_string()))?
            .create_if_missing(true);

        let pool_options = if config.is_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .min_connections(config.min_connections)
                .max_connections(config.max_connections)
        };

        let pool = pool_options
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await?;

        info!(
            url = %config.url,
            max_connections = config.max_connections,
            "connected to database"
        );
        Ok(Self {
            pool,
            statement_timeout: config.statement_timeout,
        })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub const fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            statement_timeout: None,
        }
    }

    /// Sets the per-statement deadline.
    #[must_use]
    pub const fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Acquires a connection. It returns to the pool when dropped.
    ///
    /// # Errors
    ///
    /// Returns `PoolTimeout` when no connection frees up in time.
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    /// Closes the pool, waiting for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match self.statement_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| OrmError::Timeout(format!("statement exceeded {limit:?}")))?
                .map_err(OrmError::from),
            None => fut.await.map_err(OrmError::from),
        }
    }
}

impl Backend for Database {
    async fn fetch(
        &self,
        statement: &CompiledStatement,
        shape: &[ValueKind],
    ) -> Result<Vec<Vec<SqlValue>>> {
        debug!(sql = %statement.sql, params = statement.params.len(), "fetch");
        let mut conn = self.acquire().await?;
        let rows = self
            .timed(bind_statement(statement).fetch_all(&mut *conn))
            .await?;
        rows.iter().map(|row| decode_row(row, shape)).collect()
    }

    async fn execute(&self, statement: &CompiledStatement) -> Result<u64> {
        debug!(sql = %statement.sql, params = statement.params.len(), "execute");
        let mut conn = self.acquire().await?;
        let result = self
            .timed(bind_statement(statement).execute(&mut *conn))
            .await?;
        Ok(result.rows_affected())
    }
}

/// Binds one [`SqlValue`] to a query.
#[must_use]
pub fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(Option::<i64>::None),
        SqlValue::Bool(b) => query.bind(b),
        SqlValue::Int(i) => query.bind(i),
        SqlValue::Float(f) => query.bind(f),
        SqlValue::Text(s) => query.bind(s),
        SqlValue::Blob(b) => query.bind(b),
        SqlValue::Timestamp(ts) => query.bind(ts),
        SqlValue::Date(d) => query.bind(d),
    }
}

/// Prepares a compiled statement with all of its parameters bound.
#[must_use]
pub fn bind_statement(statement: &CompiledStatement) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    statement
        .params
        .iter()
        .cloned()
        .fold(sqlx::query(&statement.sql), bind_value)
}

/// Decodes the leading columns of a row according to `shape`.
///
/// # Errors
///
/// Fails when a column cannot be read as the requested kind.
pub fn decode_row(row: &SqliteRow, shape: &[ValueKind]) -> Result<Vec<SqlValue>> {
    shape
        .iter()
        .enumerate()
        .map(|(i, &kind)| decode_column(row, i, kind))
        .collect()
}

// Unchecked decoding lets SQLite convert between storage classes, which
// expression columns and RETURNING clauses need.
fn decode_column(row: &SqliteRow, index: usize, kind: ValueKind) -> Result<SqlValue> {
    let value = match kind {
        ValueKind::Integer => row
            .try_get_unchecked::<Option<i64>, _>(index)?
            .map(SqlValue::Int),
        ValueKind::Real => row
            .try_get_unchecked::<Option<f64>, _>(index)?
            .map(SqlValue::Float),
        ValueKind::Boolean => row
            .try_get_unchecked::<Option<bool>, _>(index)?
            .map(SqlValue::Bool),
        ValueKind::Text => row
            .try_get_unchecked::<Option<String>, _>(index)?
            .map(SqlValue::Text),
        ValueKind::Blob => row
            .try_get_unchecked::<Option<Vec<u8>>, _>(index)?
            .map(SqlValue::Blob),
        ValueKind::Timestamp => row
            .try_get_unchecked::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
            .map(SqlValue::Timestamp),
        ValueKind::Date => row
            .try_get_unchecked::<Option<chrono::NaiveDate>, _>(index)?
            .map(SqlValue::Date),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> Database {
        Database::connect(&DatabaseConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_execute_and_fetch() {
        let db = memory_db().await;
        db.execute(&CompiledStatement::new(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL)",
        ))
        .await
        .unwrap();

        let insert = CompiledStatement {
            sql: "INSERT INTO t (name, score) VALUES (?, ?)".to_string(),
            params: vec![SqlValue::Text("a".into()), SqlValue::Null],
        };
        assert_eq!(db.execute(&insert).await.unwrap(), 1);

        let rows = db
            .fetch(
                &CompiledStatement::new("SELECT id, name, score FROM t"),
                &[ValueKind::Integer, ValueKind::Text, ValueKind::Real],
            )
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![vec![
                SqlValue::Int(1),
                SqlValue::Text("a".into()),
                SqlValue::Null
            ]]
        );
    }

    #[tokio::test]
    async fn test_timestamp_round_trip() {
        let db = memory_db().await;
        let ts = chrono::DateTime::parse_from_rfc3339("2024-05-01T12:30:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let rows = db
            .fetch(
                &CompiledStatement {
                    sql: "SELECT ?".to_string(),
                    params: vec![SqlValue::Timestamp(ts)],
                },
                &[ValueKind::Timestamp],
            )
            .await
            .unwrap();
        assert_eq!(rows[0][0], SqlValue::Timestamp(ts));
    }

    #[tokio::test]
    async fn test_syntax_error_is_query_error() {
        let db = memory_db().await;
        let err = db
            .execute(&CompiledStatement::new("SELEC 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::QueryError(_)));
    }

    #[tokio::test]
    async fn test_pool_timeout() {
        let db = Database::connect(
            &DatabaseConfig::default().with_acquire_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();
        let _held = db.acquire().await.unwrap();
        let err = db
            .execute(&CompiledStatement::new("SELECT 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::PoolTimeout));
    }

    #[test]
    fn test_is_memory() {
        assert!(DatabaseConfig::default().is_memory());
        assert!(!DatabaseConfig::new("sqlite://app.db").is_memory());
    }
}
