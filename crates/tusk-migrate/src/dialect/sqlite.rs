//! SQLite dialect for migrations.
//!
//! SQLite has limited ALTER TABLE support, so some operations require
//! the "table recreation" strategy: create a new table, copy data,
//! drop the old table, rename the new table, recreate its indexes.

use crate::error::{MigrateError, Result};
use crate::operations::DiffOperation;
use crate::schema::{unique_index_name, CatalogSnapshot, IndexOrigin, TableSchema};

use super::MigrationDialect;

/// Prefix of the scratch table used by table rebuilds.
pub const REBUILD_PREFIX: &str = "_tusk_new_";

/// SQLite migration dialect.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Generates SQL for creating a table under `name`.
    fn create_table_sql(&self, name: &str, table: &TableSchema) -> String {
        let primary_key = table.primary_key();
        let inline_pk = primary_key.len() <= 1;

        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(c, inline_pk))
            .collect();
        if !inline_pk {
            let quoted: Vec<String> = primary_key
                .iter()
                .map(|c| self.quote_identifier(c))
                .collect();
            defs.push(format!("PRIMARY KEY ({})", quoted.join(", ")));
        }

        format!(
            "CREATE TABLE {} ({})",
            self.quote_identifier(name),
            defs.join(", ")
        )
    }

    fn create_index_sql(&self, name: &str, table: &str, columns: &[String], unique: bool) -> String {
        let quoted: Vec<String> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            self.quote_identifier(name),
            self.quote_identifier(table),
            quoted.join(", ")
        )
    }

    /// Rebuilds `before` into the shape of `after`, copying every column the
    /// two have in common.
    fn rebuild_sql(&self, before: &TableSchema, after: &TableSchema) -> Vec<String> {
        let scratch = format!("{REBUILD_PREFIX}{}", after.name);
        let table = self.quote_identifier(&after.name);
        let mut statements = vec![self.create_table_sql(&scratch, after)];

        let copied: Vec<String> = after
            .columns
            .iter()
            .filter(|c| before.get_column(&c.name).is_some())
            .map(|c| self.quote_identifier(&c.name))
            .collect();
        if !copied.is_empty() {
            let list = copied.join(", ");
            statements.push(format!(
                "INSERT INTO {} ({list}) SELECT {list} FROM {table}",
                self.quote_identifier(&scratch)
            ));
        }

        statements.push(format!("DROP TABLE {table}"));
        statements.push(format!(
            "ALTER TABLE {} RENAME TO {table}",
            self.quote_identifier(&scratch)
        ));

        // Inline UNIQUE constraints come back as named unique indexes.
        for index in &after.indexes {
            match index.origin {
                IndexOrigin::PrimaryKey => {}
                IndexOrigin::Unique => statements.push(self.create_index_sql(
                    &unique_index_name(&after.name, &index.columns.join("_")),
                    &after.name,
                    &index.columns,
                    true,
                )),
                IndexOrigin::Created => statements.push(self.create_index_sql(
                    &index.name,
                    &after.name,
                    &index.columns,
                    index.unique,
                )),
            }
        }
        statements
    }
}

impl MigrationDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn generate_sql(
        &self,
        operation: &DiffOperation,
        before: &CatalogSnapshot,
        after: &CatalogSnapshot,
    ) -> Result<Vec<String>> {
        let sql = match operation {
            DiffOperation::CreateTable { table } => {
                vec![self.create_table_sql(&table.name, table)]
            }

            DiffOperation::DropTable { name } => {
                vec![format!("DROP TABLE {}", self.quote_identifier(name))]
            }

            DiffOperation::AddColumn { table, column } => {
                let needs_rebuild = column.primary_key
                    || (column.not_null && column.default_sql.is_none())
                    || column
                        .default_sql
                        .as_deref()
                        .is_some_and(|d| !is_constant_default(d));
                if needs_rebuild {
                    self.rebuild_sql(lookup(before, table)?, lookup(after, table)?)
                } else {
                    vec![format!(
                        "ALTER TABLE {} ADD COLUMN {}",
                        self.quote_identifier(table),
                        self.column_definition(column, true)
                    )]
                }
            }

            DiffOperation::DropColumn { table, column } => {
                let current = lookup(before, table)?;
                let needs_rebuild = current.get_column(column).is_some_and(|c| c.primary_key)
                    || current.indexes.iter().any(|i| i.covers(column));
                if needs_rebuild {
                    self.rebuild_sql(current, lookup(after, table)?)
                } else {
                    vec![format!(
                        "ALTER TABLE {} DROP COLUMN {}",
                        self.quote_identifier(table),
                        self.quote_identifier(column)
                    )]
                }
            }

            DiffOperation::RenameColumn { table, from, to } => vec![format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                self.quote_identifier(table),
                self.quote_identifier(from),
                self.quote_identifier(to)
            )],

            DiffOperation::AlterColumnType { table, .. } => {
                self.rebuild_sql(lookup(before, table)?, lookup(after, table)?)
            }

            DiffOperation::AddConstraint {
                table,
                name,
                column,
            } => vec![self.create_index_sql(name, table, std::slice::from_ref(column), true)],

            DiffOperation::DropConstraint { name, .. } => {
                vec![format!("DROP INDEX {}", self.quote_identifier(name))]
            }
        };
        Ok(sql)
    }
}

fn lookup<'a>(catalog: &'a CatalogSnapshot, table: &str) -> Result<&'a TableSchema> {
    catalog
        .get_table(table)
        .ok_or_else(|| MigrateError::InvalidState(format!("Table '{table}' does not exist")))
}

/// Returns true for defaults `ALTER TABLE ADD COLUMN` accepts.
fn is_constant_default(sql: &str) -> bool {
    let sql = sql.trim();
    sql.eq_ignore_ascii_case("NULL")
        || sql.eq_ignore_ascii_case("TRUE")
        || sql.eq_ignore_ascii_case("FALSE")
        || (sql.starts_with('\'') && sql.ends_with('\''))
        || sql.parse::<f64>().is_ok()
}
