//! Manager for database access.
//!
//! The Manager is the entry point for queries and inserts on one model.
//!
//! ```ignore
//! let user = registry.register("User", fields)?;
//!
//! let alice = user
//!     .objects()
//!     .create(&db, &Values::new().set("name", "Alice").set("age", 30))
//!     .await?;
//! let again = user.objects().get(&db, alice.pk().cloned().unwrap()).await?;
//! let adults = user.objects().filter(Q::gte("age", 18)).all(&db).await?;
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::{OrmError, Result};
use crate::model::Model;
use crate::query::Q;
use crate::queryset::QuerySet;
use crate::record::Record;
use crate::statement::{CompiledStatement, StatementBuilder};
use crate::value::{ToSqlValue, Values, ValueKind};

/// Database access methods for one model.
#[derive(Debug, Clone)]
pub struct Manager {
    model: Model,
}

impl Manager {
    /// Creates a Manager for `model`.
    #[must_use]
    pub const fn new(model: Model) -> Self {
        Self { model }
    }

    /// Returns a [`QuerySet`] over all rows.
    #[must_use]
    pub fn all(&self) -> QuerySet {
        QuerySet::new(self.model.clone())
    }

    /// Returns a filtered [`QuerySet`].
    #[must_use]
    pub fn filter(&self, q: Q) -> QuerySet {
        self.all().filter(q)
    }

    /// Returns a [`QuerySet`] excluding rows matching `q`.
    #[must_use]
    pub fn exclude(&self, q: Q) -> QuerySet {
        self.all().exclude(q)
    }

    /// Compiles an `INSERT ... RETURNING` of all columns.
    ///
    /// # Errors
    ///
    /// Fails before any I/O when a value names an unknown field, is repeated,
    /// does not fit its field, or when a required field is missing.
    pub fn compile_insert(&self, values: &Values) -> Result<CompiledStatement> {
        let model = &self.model;
        let mut supplied = HashSet::new();
        for (name, value) in values.iter() {
            let field = model.require_field(name)?;
            if !supplied.insert(name) {
                return Err(OrmError::DuplicateField {
                    model: model.name().to_string(),
                    field: name.to_string(),
                });
            }
            if !field.accepts(value) {
                return Err(OrmError::TypeMismatch {
                    field: name.to_string(),
                    expected: field.field_type.to_string(),
                    found: value.kind(),
                });
            }
        }
        if let Some(missing) = model
            .fields()
            .iter()
            .find(|f| f.is_required() && !supplied.contains(f.name.as_str()))
        {
            return Err(OrmError::MissingField {
                model: model.name().to_string(),
                field: missing.name.clone(),
            });
        }

        let mut values = values.clone();
        for field in model.fields().iter().filter(|f| f.generates_uuid()) {
            if values.get(&field.name).is_none() {
                values = values.set(&field.name, Uuid::new_v4());
            }
        }

        let mut out = StatementBuilder::new();
        out.push("INSERT INTO ").push_identifier(model.table());
        if values.is_empty() {
            out.push(" DEFAULT VALUES");
        } else {
            out.push(" (");
            for (i, (name, _)) in values.iter().enumerate() {
                if i > 0 {
                    out.push(", ");
                }
                out.push_identifier(name);
            }
            out.push(") VALUES (")
                .push_params(values.iter().map(|(_, v)| v.clone()))
                .push(")");
        }
        out.push(" RETURNING ");
        for (i, name) in model.column_names().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            out.push_identifier(name);
        }
        Ok(out.finish())
    }

    /// Inserts a row and returns it as stored, including server-assigned
    /// keys and defaults.
    ///
    /// # Errors
    ///
    /// Returns the build error of [`Manager::compile_insert`], or the
    /// backend's error when the insert fails.
    pub async fn create<B: Backend>(&self, db: &B, values: &Values) -> Result<Record> {
        let stmt = self.compile_insert(values)?;
        let shape: Vec<ValueKind> = self
            .model
            .fields()
            .iter()
            .map(|f| f.field_type.value_kind())
            .collect();
        debug!(model = self.model.name(), sql = %stmt.sql, "insert");

        let row = db
            .fetch(&stmt, &shape)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OrmError::QueryError("insert returned no row".to_string()))?;
        let columns: Arc<[usize]> = (0..shape.len()).collect::<Vec<_>>().into();
        Ok(Record::new(self.model.clone(), columns, row))
    }

    /// Gets an object by its primary key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no row has that key.
    pub async fn get<B: Backend, V: ToSqlValue + Send>(&self, db: &B, pk: V) -> Result<Record> {
        self.by_pk(pk).get(db).await
    }

    /// Gets an object by its primary key, returning None if not found.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be built or executed.
    pub async fn get_or_none<B: Backend, V: ToSqlValue + Send>(
        &self,
        db: &B,
        pk: V,
    ) -> Result<Option<Record>> {
        match self.get(db, pk).await {
            Ok(record) => Ok(Some(record)),
            Err(OrmError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Returns the number of rows.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be executed.
    pub async fn count<B: Backend>(&self, db: &B) -> Result<i64> {
        self.all().count(db).await
    }

    /// Returns the first row by primary key, or None.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be executed.
    pub async fn first<B: Backend>(&self, db: &B) -> Result<Option<Record>> {
        let pk = &self.model.primary_key().name;
        self.all().order_by(pk).first(db).await
    }

    /// Returns the last row by primary key, or None.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be executed.
    pub async fn last<B: Backend>(&self, db: &B) -> Result<Option<Record>> {
        let pk = &self.model.primary_key().name;
        self.all().order_by(&format!("-{pk}")).first(db).await
    }

    pub(crate) fn by_pk<V: ToSqlValue>(&self, pk: V) -> QuerySet {
        self.filter(Q::eq(&self.model.primary_key().name, pk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{DefaultValue, Field, FieldType};
    use crate::model::ModelDef;
    use crate::value::SqlValue;

    fn user() -> Model {
        Model::new(
            ModelDef::new(
                "User",
                "users",
                vec![
                    Field::new("id", FieldType::Integer).primary_key().auto(),
                    Field::new("name", FieldType::Text),
                    Field::new("age", FieldType::Integer).default(DefaultValue::Integer(30)),
                    Field::new("bio", FieldType::Text).nullable(),
                ],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_compile_insert() {
        let stmt = user()
            .objects()
            .compile_insert(&Values::new().set("name", "Alice").set("bio", None::<String>))
            .unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"users\" (\"name\", \"bio\") VALUES (?, ?) \
             RETURNING \"id\", \"name\", \"age\", \"bio\""
        );
        assert_eq!(
            stmt.params,
            vec![SqlValue::Text("Alice".into()), SqlValue::Null]
        );
    }

    #[test]
    fn test_compile_insert_generates_uuid_key() {
        let doc = Model::new(
            ModelDef::new(
                "Document",
                "documents",
                vec![
                    Field::new("id", FieldType::Uuid).primary_key().auto(),
                    Field::new("title", FieldType::Text),
                ],
            )
            .unwrap(),
        );
        let stmt = doc
            .objects()
            .compile_insert(&Values::new().set("title", "Draft"))
            .unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"documents\" (\"title\", \"id\") VALUES (?, ?) \
             RETURNING \"id\", \"title\""
        );
        let SqlValue::Text(id) = &stmt.params[1] else {
            panic!("expected a text key, got {:?}", stmt.params[1]);
        };
        assert_eq!(Uuid::parse_str(id).unwrap().get_version_num(), 4);

        let fixed = "123e4567-e89b-12d3-a456-426614174000";
        let stmt = doc
            .objects()
            .compile_insert(&Values::new().set("id", fixed).set("title", "Draft"))
            .unwrap();
        assert_eq!(stmt.params[0], SqlValue::Text(fixed.into()));
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn test_insert_unknown_field() {
        let err = user()
            .objects()
            .compile_insert(&Values::new().set("name", "A").set("nickname", "a"))
            .unwrap_err();
        assert!(matches!(err, OrmError::UnknownField { .. }));
    }

    #[test]
    fn test_insert_missing_required() {
        let err = user()
            .objects()
            .compile_insert(&Values::new().set("age", 3))
            .unwrap_err();
        assert!(matches!(err, OrmError::MissingField { field, .. } if field == "name"));
    }

    #[test]
    fn test_insert_type_mismatch() {
        let err = user()
            .objects()
            .compile_insert(&Values::new().set("name", 12))
            .unwrap_err();
        assert!(matches!(err, OrmError::TypeMismatch { .. }));
    }

    #[test]
    fn test_insert_null_into_required() {
        let err = user()
            .objects()
            .compile_insert(&Values::new().set("name", None::<String>))
            .unwrap_err();
        assert!(matches!(err, OrmError::TypeMismatch { found: "null", .. }));
    }

    #[test]
    fn test_insert_repeated_field() {
        let err = user()
            .objects()
            .compile_insert(&Values::new().set("name", "a").set("name", "b"))
            .unwrap_err();
        assert!(matches!(err, OrmError::DuplicateField { .. }));
    }
}
