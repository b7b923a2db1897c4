//! Database dialect implementations.
//!
//! A dialect renders diff operations into DDL for one database system.

mod sqlite;

pub use sqlite::SqliteDialect;

use crate::error::Result;
use crate::operations::DiffOperation;
use crate::schema::{CatalogSnapshot, ColumnSchema};

/// Trait for database-specific DDL generation.
pub trait MigrationDialect: Send + Sync {
    /// Returns the dialect name.
    #[must_use]
    fn name(&self) -> &'static str;

    /// Generates the statements for one operation.
    ///
    /// `before` and `after` are the simulated catalog immediately before and
    /// after the operation.
    ///
    /// # Errors
    ///
    /// Fails when the operation cannot be expressed against `before`.
    fn generate_sql(
        &self,
        operation: &DiffOperation,
        before: &CatalogSnapshot,
        after: &CatalogSnapshot,
    ) -> Result<Vec<String>>;

    /// Generates column definition SQL.
    ///
    /// `inline_pk` is false for tables with a composite primary key, which
    /// is declared as a table constraint instead.
    #[must_use]
    fn column_definition(&self, column: &ColumnSchema, inline_pk: bool) -> String {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            column.declared_type.clone(),
        ];

        if column.not_null {
            parts.push("NOT NULL".to_string());
        }

        if column.primary_key && inline_pk {
            parts.push("PRIMARY KEY".to_string());
        }

        if let Some(default_sql) = &column.default_sql {
            parts.push(format!("DEFAULT {default_sql}"));
        }

        parts.join(" ")
    }

    /// Quote an identifier (table name, column name, etc.).
    #[must_use]
    fn quote_identifier(&self, name: &str) -> String {
        tusk_orm::quote_identifier(name)
    }
}
