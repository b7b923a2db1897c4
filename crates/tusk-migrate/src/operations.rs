//! Schema diff operations.
//!
//! Each operation carries the minimal data needed to render its DDL and
//! reports how much data it can lose.

use std::fmt;

use crate::schema::{ColumnSchema, TableSchema};

/// How much existing data an operation can lose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Risk {
    /// No existing data is touched.
    Safe,
    /// Values may be converted.
    Lossy,
    /// Data is removed.
    Destructive,
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Safe => "safe",
            Self::Lossy => "lossy",
            Self::Destructive => "destructive",
        })
    }
}

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOperation {
    /// Create a table with all of its columns.
    CreateTable {
        /// Table definition.
        table: TableSchema,
    },

    /// Drop a table.
    DropTable {
        /// Table name.
        name: String,
    },

    /// Add a column to a table.
    AddColumn {
        /// Table name.
        table: String,
        /// Column definition.
        column: ColumnSchema,
    },

    /// Drop a column from a table.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// Rename a column, keeping its data.
    RenameColumn {
        /// Table name.
        table: String,
        /// Current column name.
        from: String,
        /// New column name.
        to: String,
    },

    /// Change the declared type of a column.
    AlterColumnType {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Declared type before the change.
        from_type: String,
        /// Declared type after the change.
        to_type: String,
    },

    /// Add a single-column unique constraint.
    AddConstraint {
        /// Table name.
        table: String,
        /// Constraint (index) name.
        name: String,
        /// Constrained column.
        column: String,
    },

    /// Drop a unique constraint.
    DropConstraint {
        /// Table name.
        table: String,
        /// Constraint (index) name.
        name: String,
    },
}

impl DiffOperation {
    /// Returns the table this operation changes.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable { table } => &table.name,
            Self::DropTable { name } => name,
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::AlterColumnType { table, .. }
            | Self::AddConstraint { table, .. }
            | Self::DropConstraint { table, .. } => table,
        }
    }

    /// Returns the risk level of this operation.
    #[must_use]
    pub const fn risk(&self) -> Risk {
        match self {
            Self::DropTable { .. } | Self::DropColumn { .. } => Risk::Destructive,
            Self::AlterColumnType { .. } => Risk::Lossy,
            _ => Risk::Safe,
        }
    }

    /// Returns the plan phase. Lower phases run first.
    #[must_use]
    pub const fn phase(&self) -> u8 {
        match self {
            Self::CreateTable { .. } => 0,
            Self::RenameColumn { .. } => 1,
            Self::AddColumn { .. } => 2,
            Self::AlterColumnType { .. } => 3,
            Self::AddConstraint { .. } => 4,
            Self::DropConstraint { .. } => 5,
            Self::DropColumn { .. } => 6,
            Self::DropTable { .. } => 7,
        }
    }

    /// Returns a human-readable description of this operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::CreateTable { table } => format!("Create table '{}'", table.name),
            Self::DropTable { name } => format!("Drop table '{name}'"),
            Self::AddColumn { table, column } => {
                format!("Add column '{}' to table '{table}'", column.name)
            }
            Self::DropColumn { table, column } => {
                format!("Drop column '{column}' from table '{table}'")
            }
            Self::RenameColumn { table, from, to } => {
                format!("Rename column '{from}' to '{to}' in table '{table}'")
            }
            Self::AlterColumnType {
                table,
                column,
                from_type,
                to_type,
            } => format!("Alter column '{column}' in table '{table}' from {from_type} to {to_type}"),
            Self::AddConstraint { table, name, .. } => {
                format!("Add unique constraint '{name}' to table '{table}'")
            }
            Self::DropConstraint { table, name } => {
                format!("Drop unique constraint '{name}' from table '{table}'")
            }
        }
    }
}

impl fmt::Display for DiffOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_levels() {
        let drop = DiffOperation::DropColumn {
            table: "users".into(),
            column: "age".into(),
        };
        assert_eq!(drop.risk(), Risk::Destructive);

        let alter = DiffOperation::AlterColumnType {
            table: "users".into(),
            column: "age".into(),
            from_type: "TEXT".into(),
            to_type: "INTEGER".into(),
        };
        assert_eq!(alter.risk(), Risk::Lossy);

        let add = DiffOperation::AddColumn {
            table: "users".into(),
            column: ColumnSchema::new("bio", "TEXT"),
        };
        assert_eq!(add.risk(), Risk::Safe);
        assert!(Risk::Safe < Risk::Destructive);
    }

    #[test]
    fn test_descriptions() {
        let add = DiffOperation::AddColumn {
            table: "users".into(),
            column: ColumnSchema::new("bio", "TEXT"),
        };
        assert_eq!(add.description(), "Add column 'bio' to table 'users'");

        let rename = DiffOperation::RenameColumn {
            table: "users".into(),
            from: "name".into(),
            to: "full_name".into(),
        };
        assert_eq!(
            rename.to_string(),
            "Rename column 'name' to 'full_name' in table 'users'"
        );
    }

    #[test]
    fn test_phase_order() {
        let create = DiffOperation::CreateTable {
            table: TableSchema::new("users"),
        };
        let add_constraint = DiffOperation::AddConstraint {
            table: "users".into(),
            name: "uq_users_email".into(),
            column: "email".into(),
        };
        let drop_table = DiffOperation::DropTable {
            name: "legacy".into(),
        };
        assert!(create.phase() < add_constraint.phase());
        assert!(add_constraint.phase() < drop_table.phase());
        assert_eq!(drop_table.table(), "legacy");
    }
}
