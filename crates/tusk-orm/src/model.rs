//! Model definitions and the model registry.
//!
//! A model is an entity name, a table name and an ordered list of fields
//! with exactly one primary key. Models are validated once when they are
//! registered and shared read-only afterwards.

use std::collections::{BTreeMap, HashSet};
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{OrmError, Result};
use crate::fields::Field;
use crate::manager::Manager;
use crate::queryset::QuerySet;

fn identifier_regex() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"))
}

/// Validates a SQL identifier (entity, table or field name).
///
/// # Errors
///
/// Returns `InvalidName` unless `name` is a plain identifier.
pub fn validate_identifier(name: &str) -> Result<()> {
    if identifier_regex().is_match(name) {
        Ok(())
    } else {
        Err(OrmError::InvalidName(name.to_string()))
    }
}

/// Infers a table name from an entity name: `User` → `users`,
/// `OrderItem` → `order_items`.
#[must_use]
pub fn infer_table_name(entity: &str) -> String {
    let mut table = String::with_capacity(entity.len() + 4);
    for (i, c) in entity.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 && !table.ends_with('_') {
                table.push('_');
            }
            table.push(c.to_ascii_lowercase());
        } else {
            table.push(c);
        }
    }
    table.push('s');
    table
}

/// The validated definition of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDef {
    name: String,
    table: String,
    fields: Vec<Field>,
    pk_index: usize,
}

impl ModelDef {
    /// Validates a field list and builds a model definition.
    ///
    /// # Errors
    ///
    /// Fails on an invalid identifier, a duplicate field, or anything but
    /// exactly one primary key.
    pub fn new(name: &str, table: &str, fields: Vec<Field>) -> Result<Self> {
        validate_identifier(name)?;
        validate_identifier(table)?;

        let mut seen = HashSet::new();
        for field in &fields {
            validate_identifier(&field.name)?;
            if !seen.insert(field.name.as_str()) {
                return Err(OrmError::DuplicateField {
                    model: name.to_string(),
                    field: field.name.clone(),
                });
            }
        }

        let pks: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.primary_key)
            .map(|(i, _)| i)
            .collect();

        let pk_index = match pks.as_slice() {
            [] => return Err(OrmError::NoPrimaryKey(name.to_string())),
            [single] => *single,
            many => {
                return Err(OrmError::MultiplePrimaryKeys {
                    model: name.to_string(),
                    fields: many.iter().map(|&i| fields[i].name.clone()).collect(),
                })
            }
        };

        Ok(Self {
            name: name.to_string(),
            table: table.to_string(),
            fields,
            pk_index,
        })
    }

    /// Returns the entity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns the primary key field.
    #[must_use]
    pub fn primary_key(&self) -> &Field {
        &self.fields[self.pk_index]
    }

    /// Returns the position of a field in column order.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks up a field by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if the model has no such field.
    pub fn require_field(&self, name: &str) -> Result<&Field> {
        self.field(name).ok_or_else(|| OrmError::UnknownField {
            model: self.name.clone(),
            field: name.to_string(),
        })
    }

    /// Returns the column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// A shared handle to a registered model.
#[derive(Debug, Clone, PartialEq)]
pub struct Model(Arc<ModelDef>);

impl Model {
    /// Wraps a definition without registering it.
    #[must_use]
    pub fn new(def: ModelDef) -> Self {
        Self(Arc::new(def))
    }

    /// Returns a [`Manager`] for this model.
    #[must_use]
    pub fn objects(&self) -> Manager {
        Manager::new(self.clone())
    }

    /// Returns an unfiltered [`QuerySet`] over this model.
    #[must_use]
    pub fn query(&self) -> QuerySet {
        QuerySet::new(self.clone())
    }
}

impl Deref for Model {
    type Target = ModelDef;

    fn deref(&self) -> &ModelDef {
        &self.0
    }
}

/// Returns the ordered fields of a model.
///
/// This ordering is the column order of generated SQL and of hydrated rows.
#[must_use]
pub fn fields_of(model: &Model) -> &[Field] {
    model.fields()
}

/// Process-wide set of registered models, keyed by entity name.
///
/// Iteration order is by entity name, which keeps migration plans
/// deterministic.
#[derive(Debug, Default)]
pub struct Registry {
    models: RwLock<BTreeMap<String, Model>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the global registry.
    #[must_use]
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    /// Registers a model whose table name is inferred from the entity name.
    ///
    /// # Errors
    ///
    /// Fails when the definition does not validate.
    pub fn register(&self, entity: &str, fields: Vec<Field>) -> Result<Model> {
        self.register_table(entity, &infer_table_name(entity), fields)
    }

    /// Registers a model with an explicit table name.
    ///
    /// Registering an entity name twice returns the first handle.
    ///
    /// # Errors
    ///
    /// Fails when the definition does not validate.
    pub fn register_table(&self, entity: &str, table: &str, fields: Vec<Field>) -> Result<Model> {
        let existing = self.models.read().get(entity).cloned();
        if let Some(existing) = existing {
            if existing.table() != table || existing.fields() != fields.as_slice() {
                warn!(
                    entity,
                    "model already registered with a different definition, keeping the first"
                );
            }
            return Ok(existing);
        }

        let def = ModelDef::new(entity, table, fields)?;

        let model = self
            .models
            .write()
            .entry(entity.to_string())
            .or_insert_with(|| Model::new(def))
            .clone();
        debug!(entity, table = model.table(), "registered model");
        Ok(model)
    }

    /// Looks up a model by entity name.
    #[must_use]
    pub fn get(&self, entity: &str) -> Option<Model> {
        self.models.read().get(entity).cloned()
    }

    /// Returns all models ordered by entity name.
    #[must_use]
    pub fn models(&self) -> Vec<Model> {
        self.models.read().values().cloned().collect()
    }

    /// Returns the number of registered models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    /// Returns true if no model is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}

/// Registers a model in the global registry.
///
/// # Errors
///
/// Fails when the definition does not validate.
pub fn register(entity: &str, fields: Vec<Field>) -> Result<Model> {
    Registry::global().register(entity, fields)
}

/// Looks up a model in the global registry.
#[must_use]
pub fn lookup(entity: &str) -> Option<Model> {
    Registry::global().get(entity)
}
