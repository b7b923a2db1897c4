//! Simulated catalog changes.
//!
//! Replaying operations on a copy of the inspected catalog gives the planner
//! the table shape at every point of a plan, which SQLite table rebuilds
//! need.

use crate::error::{MigrateError, Result};
use crate::operations::DiffOperation;
use crate::schema::{CatalogSnapshot, IndexOrigin, IndexSchema, TableSchema};

impl CatalogSnapshot {
    /// Applies a single operation to this snapshot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when the operation does not fit the snapshot,
    /// such as a missing table or an existing column.
    pub fn apply(&mut self, operation: &DiffOperation) -> Result<()> {
        match operation {
            DiffOperation::CreateTable { table } => {
                if self.get_table(&table.name).is_some() {
                    return Err(MigrateError::InvalidState(format!(
                        "Table '{}' already exists",
                        table.name
                    )));
                }
                self.tables.push(table.clone());
                self.tables.sort_by(|a, b| a.name.cmp(&b.name));
            }

            DiffOperation::DropTable { name } => {
                let before = self.tables.len();
                self.tables.retain(|t| &t.name != name);
                if self.tables.len() == before {
                    return Err(missing_table(name));
                }
            }

            DiffOperation::AddColumn { table, column } => {
                let t = self.table_mut(table)?;
                if t.get_column(&column.name).is_some() {
                    return Err(MigrateError::InvalidState(format!(
                        "Column '{}' already exists in table '{table}'",
                        column.name
                    )));
                }
                t.columns.push(column.clone());
            }

            DiffOperation::DropColumn { table, column } => {
                let t = self.table_mut(table)?;
                require_column(t, column)?;
                t.columns.retain(|c| &c.name != column);
                t.indexes.retain(|i| !i.covers(column));
            }

            DiffOperation::RenameColumn { table, from, to } => {
                rename_column(self.table_mut(table)?, from, to)?;
            }

            DiffOperation::AlterColumnType {
                table,
                column,
                to_type,
                ..
            } => {
                let t = self.table_mut(table)?;
                require_column(t, column)?;
                if let Some(c) = t.get_column_mut(column) {
                    c.declared_type = to_type.clone();
                }
            }

            DiffOperation::AddConstraint {
                table,
                name,
                column,
            } => {
                let t = self.table_mut(table)?;
                require_column(t, column)?;
                if t.indexes.iter().any(|i| &i.name == name) {
                    return Err(MigrateError::InvalidState(format!(
                        "Index '{name}' already exists"
                    )));
                }
                t.indexes.push(IndexSchema {
                    name: name.clone(),
                    columns: vec![column.clone()],
                    unique: true,
                    origin: IndexOrigin::Created,
                });
                t.indexes.sort_by(|a, b| a.name.cmp(&b.name));
            }

            DiffOperation::DropConstraint { table, name } => {
                let t = self.table_mut(table)?;
                let before = t.indexes.len();
                t.indexes.retain(|i| &i.name != name);
                if t.indexes.len() == before {
                    return Err(MigrateError::InvalidState(format!(
                        "Index '{name}' does not exist on table '{table}'"
                    )));
                }
            }
        }
        Ok(())
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableSchema> {
        self.get_table_mut(name).ok_or_else(|| missing_table(name))
    }
}

fn missing_table(name: &str) -> MigrateError {
    MigrateError::InvalidState(format!("Table '{name}' does not exist"))
}

fn rename_column(table: &mut TableSchema, from: &str, to: &str) -> Result<()> {
    if table.get_column(to).is_some() {
        return Err(MigrateError::InvalidState(format!(
            "Column '{to}' already exists in table '{}'",
            table.name
        )));
    }
    require_column(table, from)?;
    if let Some(c) = table.get_column_mut(from) {
        c.name = to.to_string();
    }
    for index in &mut table.indexes {
        for c in &mut index.columns {
            if c == from {
                *c = to.to_string();
            }
        }
    }
    Ok(())
}

fn require_column(table: &TableSchema, column: &str) -> Result<()> {
    if table.get_column(column).is_none() {
        return Err(MigrateError::InvalidState(format!(
            "Column '{column}' does not exist in table '{}'",
            table.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSchema;

    fn snapshot() -> CatalogSnapshot {
        let mut snapshot = CatalogSnapshot::default();
        snapshot
            .apply(&DiffOperation::CreateTable {
                table: TableSchema::new("users")
                    .column(ColumnSchema {
                        primary_key: true,
                        not_null: true,
                        ..ColumnSchema::new("id", "INTEGER")
                    })
                    .column(ColumnSchema::new("name", "TEXT")),
            })
            .unwrap();
        snapshot
    }

    #[test]
    fn test_create_table_twice() {
        let mut s = snapshot();
        let err = s
            .apply(&DiffOperation::CreateTable {
                table: TableSchema::new("users"),
            })
            .unwrap_err();
        assert!(matches!(err, MigrateError::InvalidState(_)));
    }

    #[test]
    fn test_rename_column_updates_indexes() {
        let mut s = snapshot();
        s.apply(&DiffOperation::AddConstraint {
            table: "users".into(),
            name: "uq_users_name".into(),
            column: "name".into(),
        })
        .unwrap();
        s.apply(&DiffOperation::RenameColumn {
            table: "users".into(),
            from: "name".into(),
            to: "full_name".into(),
        })
        .unwrap();

        let users = s.get_table("users").unwrap();
        assert!(users.get_column("full_name").is_some());
        assert!(users.get_column("name").is_none());
        assert!(users.has_unique_index_on("full_name"));
    }

    #[test]
    fn test_drop_column_drops_covering_indexes() {
        let mut s = snapshot();
        s.apply(&DiffOperation::AddConstraint {
            table: "users".into(),
            name: "uq_users_name".into(),
            column: "name".into(),
        })
        .unwrap();
        s.apply(&DiffOperation::DropColumn {
            table: "users".into(),
            column: "name".into(),
        })
        .unwrap();
        let users = s.get_table("users").unwrap();
        assert_eq!(users.columns.len(), 1);
        assert!(users.indexes.is_empty());
    }

    #[test]
    fn test_alter_and_drop_table() {
        let mut s = snapshot();
        s.apply(&DiffOperation::AlterColumnType {
            table: "users".into(),
            column: "name".into(),
            from_type: "TEXT".into(),
            to_type: "VARCHAR(80)".into(),
        })
        .unwrap();
        assert_eq!(
            s.get_table("users").unwrap().get_column("name").unwrap().declared_type,
            "VARCHAR(80)"
        );

        s.apply(&DiffOperation::DropTable {
            name: "users".into(),
        })
        .unwrap();
        assert!(s.tables.is_empty());
        assert!(s
            .apply(&DiffOperation::DropTable {
                name: "users".into()
            })
            .is_err());
    }
}
