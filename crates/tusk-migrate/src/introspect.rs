//! Live catalog introspection.
//!
//! Reads tables, columns and indexes through `sqlite_master` and the
//! `pragma_*` table-valued functions.

use sqlx::SqliteConnection;
use tracing::{debug, warn};
use tusk_orm::Database;

use crate::error::Result;
use crate::history;
use crate::lock::LOCK_TABLE;
use crate::schema::{CatalogSnapshot, ColumnSchema, IndexOrigin, IndexSchema, TableSchema};

/// Inspects the database behind `conn`.
///
/// # Errors
///
/// Fails when a catalog query fails.
pub async fn inspect(conn: &mut SqliteConnection) -> Result<CatalogSnapshot> {
    let names: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
         AND name NOT IN (?, ?) ORDER BY name",
    )
    .bind(history::HISTORY_TABLE)
    .bind(LOCK_TABLE)
    .fetch_all(&mut *conn)
    .await?;

    let mut tables = Vec::with_capacity(names.len());
    for (name,) in names {
        let table = inspect_table(&mut *conn, name).await?;
        debug!(
            table = %table.name,
            columns = table.columns.len(),
            indexes = table.indexes.len(),
            "inspected table"
        );
        tables.push(table);
    }

    let history_head = history::head(conn).await?;
    Ok(CatalogSnapshot {
        tables,
        history_head,
    })
}

/// Acquires a pooled connection and inspects the database.
///
/// # Errors
///
/// Fails when no connection is available or a catalog
/// query fails.
pub async fn inspect_database(db: &Database) -> Result<CatalogSnapshot> {
    let mut conn = db.acquire().await?;
    inspect(&mut conn).await
}

async fn inspect_table(conn: &mut SqliteConnection, name: String) -> Result<TableSchema> {
    let columns: Vec<(String, String, i64, Option<String>, i64)> = sqlx::query_as(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid",
    )
    .bind(&name)
    .fetch_all(&mut *conn)
    .await?;

    let columns = columns
        .into_iter()
        .map(|(column, declared_type, not_null, default_sql, pk)| ColumnSchema {
            name: column,
            declared_type,
            not_null: not_null != 0,
            default_sql,
            primary_key: pk > 0,
        })
        .collect();

    let listed: Vec<(String, i64, String)> =
        sqlx::query_as("SELECT name, \"unique\", origin FROM pragma_index_list(?) ORDER BY name")
            .bind(&name)
            .fetch_all(&mut *conn)
            .await?;

    let mut indexes = Vec::with_capacity(listed.len());
    for (index, unique, origin) in listed {
        let keys: Vec<(Option<String>,)> =
            sqlx::query_as("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
                .bind(&index)
                .fetch_all(&mut *conn)
                .await?;
        let Some(columns) = keys.into_iter().map(|(c,)| c).collect::<Option<Vec<_>>>() else {
            warn!(table = %name, index = %index, "skipping expression index");
            continue;
        };
        indexes.push(IndexSchema {
            name: index,
            columns,
            unique: unique != 0,
            origin: IndexOrigin::from_pragma(&origin),
        });
    }

    Ok(TableSchema {
        name,
        columns,
        indexes,
    })
}
