//! JSON model manifests.
//!
//! The `tusk-migrate` binary reads the models it migrates from a manifest,
//! and `inspectdb` writes one from a live catalog.
//!
//! ```json
//! {
//!   "models": [
//!     {
//!       "name": "User",
//!       "fields": [
//!         { "name": "id", "type": "integer", "primary_key": true, "auto": true },
//!         { "name": "email", "type": { "varchar": 120 }, "unique": true },
//!         { "name": "bio", "type": "text", "nullable": true }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;
use tusk_orm::{DefaultValue, Field, FieldType, Model, Registry};

use crate::error::Result;
use crate::schema::{normalize_type, CatalogSnapshot, TableSchema};

/// A set of model declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    /// Declared models.
    pub models: Vec<ModelEntry>,
}

/// One model declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Entity name.
    pub name: String,
    /// Table name; inferred from the entity name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Fields in column order.
    pub fields: Vec<Field>,
}

impl ModelManifest {
    /// Reads a manifest from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or is not a valid manifest.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parses a manifest from JSON text.
    ///
    /// # Errors
    ///
    /// Fails when the text is not a valid manifest.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serializes the manifest as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Fails when a field cannot be serialized.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Registers every model and returns the handles in manifest order.
    ///
    /// # Errors
    ///
    /// Fails on the first entry the registry rejects.
    pub fn register(&self, registry: &Registry) -> Result<Vec<Model>> {
        let mut models = Vec::with_capacity(self.models.len());
        for entry in &self.models {
            let model = match &entry.table {
                Some(table) => registry.register_table(&entry.name, table, entry.fields.clone())?,
                None => registry.register(&entry.name, entry.fields.clone())?,
            };
            models.push(model);
        }
        Ok(models)
    }

    /// Builds a manifest describing a live catalog.
    ///
    /// When `tables` is non-empty only those tables are described. Tables
    /// without a single-column primary key cannot be modelled and are
    /// skipped with a warning.
    #[must_use]
    pub fn from_catalog(catalog: &CatalogSnapshot, tables: &[String]) -> (Self, Vec<String>) {
        let mut warnings = Vec::new();
        for name in tables {
            if catalog.get_table(name).is_none() {
                warnings.push(format!("Table '{name}' does not exist"));
            }
        }

        let models = catalog
            .tables
            .iter()
            .filter(|t| tables.is_empty() || tables.contains(&t.name))
            .filter_map(|t| {
                model_entry(t).map_or_else(
                    |message| {
                        warnings.push(message);
                        None
                    },
                    Some,
                )
            })
            .collect();

        for message in &warnings {
            warn!("{message}");
        }
        (Self { models }, warnings)
    }
}

fn model_entry(table: &TableSchema) -> std::result::Result<ModelEntry, String> {
    let primary_key = table.primary_key();
    if primary_key.len() != 1 {
        return Err(format!(
            "Skipping table '{}': a model needs exactly one primary key column, found {}",
            table.name,
            primary_key.len()
        ));
    }

    let fields = table
        .columns
        .iter()
        .map(|column| {
            let mut field = Field::new(&column.name, FieldType::from_sql_type(&column.declared_type));
            if column.primary_key {
                field = field.primary_key();
                if field.field_type == FieldType::Uuid
                    || normalize_type(&column.declared_type) == "INTEGER"
                {
                    field = field.auto();
                }
            } else {
                if !column.not_null {
                    field = field.nullable();
                }
                if table.has_unique_index_on(&column.name) {
                    field = field.unique();
                }
            }
            if let Some(default) = column.default_sql.as_deref() {
                field = field.default(parse_default(default));
            }
            field
        })
        .collect();

    Ok(ModelEntry {
        name: entity_name(&table.name),
        table: Some(table.name.clone()),
        fields,
    })
}

/// Derives an entity name from a table name: `order_items` → `OrderItem`,
/// `categories` → `Category`. Names ending in `ss` are left as they are.
#[must_use]
pub fn entity_name(table: &str) -> String {
    singular(table)
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + chars.as_str()
            })
        })
        .collect()
}

fn singular(table: &str) -> String {
    if let Some(stem) = table.strip_suffix("ies") {
        format!("{stem}y")
    } else if table.ends_with("ss") {
        table.to_string()
    } else {
        table
            .strip_suffix('s')
            .filter(|stem| !stem.is_empty())
            .unwrap_or(table)
            .to_string()
    }
}

/// Parses a column default as reported by the catalog.
#[must_use]
pub fn parse_default(sql: &str) -> DefaultValue {
    let sql = sql.trim();
    if sql.eq_ignore_ascii_case("NULL") {
        DefaultValue::Null
    } else if let Ok(i) = sql.parse::<i64>() {
        DefaultValue::Integer(i)
    } else if let Some(text) = sql
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
    {
        DefaultValue::String(text.replace("''", "'"))
    } else if let Ok(f) = sql.parse::<f64>() {
        DefaultValue::Float(f)
    } else {
        DefaultValue::Expression(sql.to_string())
    }
}
