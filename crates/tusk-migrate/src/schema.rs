//! Catalog representation types.
//!
//! These types describe tables as SQLite reports them. They are produced by
//! introspection, derived from registered models for comparison, and
//! mutated in memory while a plan is rendered.

use tusk_orm::{DefaultValue, Field, Model};

/// Prefix of unique indexes created and owned by the migrator.
pub const MANAGED_INDEX_PREFIX: &str = "uq_";

/// Name of the managed unique index for `table.column`.
#[must_use]
pub fn unique_index_name(table: &str, column: &str) -> String {
    format!("{MANAGED_INDEX_PREFIX}{table}_{column}")
}

/// Normalizes a declared column type for comparison.
#[must_use]
pub fn normalize_type(declared: &str) -> String {
    declared
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase()
}

/// A column as declared in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// Declared type text (e.g. `VARCHAR(120)`).
    pub declared_type: String,
    /// Whether `NOT NULL` applies.
    pub not_null: bool,
    /// Default expression as SQL text.
    pub default_sql: Option<String>,
    /// Whether the column is (part of) the primary key.
    pub primary_key: bool,
}

impl ColumnSchema {
    /// Creates a nullable column with no default.
    #[must_use]
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            not_null: false,
            default_sql: None,
            primary_key: false,
        }
    }

    /// Derives the column a model field should have.
    #[must_use]
    pub fn from_field(field: &Field) -> Self {
        Self {
            name: field.name.clone(),
            declared_type: field.sql_type(),
            not_null: !field.nullable,
            default_sql: field.default.as_ref().map(DefaultValue::to_sql),
            primary_key: field.primary_key,
        }
    }

    /// Returns true if both declared types are equal ignoring case and
    /// spacing.
    #[must_use]
    pub fn same_type(&self, other: &str) -> bool {
        normalize_type(&self.declared_type) == normalize_type(other)
    }
}

/// Where an index came from, as reported by `pragma_index_list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrigin {
    /// `CREATE INDEX`.
    Created,
    /// An inline `UNIQUE` constraint.
    Unique,
    /// A `PRIMARY KEY` constraint.
    PrimaryKey,
}

impl IndexOrigin {
    /// Parses the `origin` column of `pragma_index_list`.
    #[must_use]
    pub fn from_pragma(origin: &str) -> Self {
        match origin {
            "u" => Self::Unique,
            "pk" => Self::PrimaryKey,
            _ => Self::Created,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "c",
            Self::Unique => "u",
            Self::PrimaryKey => "pk",
        }
    }
}

/// An index on a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    /// Index name.
    pub name: String,
    /// Indexed columns, in key order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// How the index was created.
    pub origin: IndexOrigin,
}

impl IndexSchema {
    /// Returns true for unique indexes created by the migrator.
    #[must_use]
    pub fn is_managed(&self) -> bool {
        self.origin == IndexOrigin::Created
            && self.unique
            && self.columns.len() == 1
            && self.name.starts_with(MANAGED_INDEX_PREFIX)
    }

    /// Returns true if the index enforces uniqueness of `column` alone.
    #[must_use]
    pub fn is_unique_on(&self, column: &str) -> bool {
        self.unique && self.columns.len() == 1 && self.columns[0] == column
    }

    /// Returns true if the index references `column`.
    #[must_use]
    pub fn covers(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// A table with its columns and indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnSchema>,
    /// Indexes ordered by name.
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    /// Creates an empty table schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: ColumnSchema) -> Self {
        self.columns.push(column);
        self
    }

    /// Derives the table a model should have. Unique constraints are not
    /// part of the result; they are planned as separate indexes.
    #[must_use]
    pub fn from_model(model: &Model) -> Self {
        Self {
            name: model.table().to_string(),
            columns: model.fields().iter().map(ColumnSchema::from_field).collect(),
            indexes: Vec::new(),
        }
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Gets a mutable column by name.
    pub fn get_column_mut(&mut self, name: &str) -> Option<&mut ColumnSchema> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Returns true if some unique index covers exactly `column`.
    #[must_use]
    pub fn has_unique_index_on(&self, column: &str) -> bool {
        self.indexes.iter().any(|i| i.is_unique_on(column))
    }

    /// Returns the primary key column names in declaration order.
    #[must_use]
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// The inspected state of a database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    /// User tables ordered by name.
    pub tables: Vec<TableSchema>,
    /// Highest applied migration step id.
    pub history_head: Option<i64>,
}

impl CatalogSnapshot {
    /// Gets a table by name.
    #[must_use]
    pub fn get_table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Gets a mutable table by name.
    pub fn get_table_mut(&mut self, name: &str) -> Option<&mut TableSchema> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    /// Returns table names.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    /// Returns a BLAKE3 digest of everything the differ and planner read.
    ///
    /// Two snapshots with equal checksums produce identical plans.
    #[must_use]
    pub fn checksum(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        let head = self.history_head.map_or_else(String::new, |h| h.to_string());
        feed(&mut hasher, &["head", &head]);
        for table in &self.tables {
            feed(&mut hasher, &["table", &table.name]);
            for column in &table.columns {
                feed(
                    &mut hasher,
                    &[
                        "column",
                        &column.name,
                        &column.declared_type,
                        if column.not_null { "1" } else { "0" },
                        column.default_sql.as_deref().unwrap_or("\u{0}"),
                        if column.primary_key { "1" } else { "0" },
                    ],
                );
            }
            for index in &table.indexes {
                feed(
                    &mut hasher,
                    &[
                        "index",
                        &index.name,
                        &index.columns.join(","),
                        if index.unique { "1" } else { "0" },
                        index.origin.as_str(),
                    ],
                );
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

// Length-prefixed so that adjacent fields cannot run together.
fn feed(hasher: &mut blake3::Hasher, parts: &[&str]) {
    for part in parts {
        let len = u64::try_from(part.len()).unwrap_or(u64::MAX);
        hasher.update(&len.to_le_bytes());
        hasher.update(part.as_bytes());
    }
}
