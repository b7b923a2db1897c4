//! Hydrated rows.
//!
//! A [`Record`] holds the values of one row in model column order. Typed
//! structs are built from records through [`FromRecord`].

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::{OrmError, Result};
use crate::model::Model;
use crate::queryset::QuerySet;
use crate::value::{SqlValue, Values};

/// Conversion from a decoded [`SqlValue`] into a Rust type.
pub trait FromSqlValue: Sized {
    /// Name used in `TypeMismatch` errors.
    const EXPECTED: &'static str;

    /// Converts the value, or returns `None` if it has another kind.
    fn from_sql_value(value: &SqlValue) -> Option<Self>;
}

impl FromSqlValue for SqlValue {
    const EXPECTED: &'static str = "any";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromSqlValue for i64 {
    const EXPECTED: &'static str = "integer";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        value.as_i64()
    }
}

impl FromSqlValue for i32 {
    const EXPECTED: &'static str = "integer";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        value.as_i64().and_then(|i| Self::try_from(i).ok())
    }
}

impl FromSqlValue for f64 {
    const EXPECTED: &'static str = "real";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        value.as_f64()
    }
}

impl FromSqlValue for bool {
    const EXPECTED: &'static str = "boolean";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Bool(b) => Some(*b),
            SqlValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }
}

impl FromSqlValue for String {
    const EXPECTED: &'static str = "text";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromSqlValue for Vec<u8> {
    const EXPECTED: &'static str = "blob";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Blob(b) => Some(b.clone()),
            _ => None,
        }
    }
}

impl FromSqlValue for DateTime<Utc> {
    const EXPECTED: &'static str = "timestamp";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl FromSqlValue for NaiveDate {
    const EXPECTED: &'static str = "date";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Date(d) => Some(*d),
            _ => None,
        }
    }
}

impl FromSqlValue for Uuid {
    const EXPECTED: &'static str = "uuid";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Text(s) => Self::parse_str(s).ok(),
            _ => None,
        }
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        if value.is_null() {
            Some(None)
        } else {
            T::from_sql_value(value).map(Some)
        }
    }
}

/// Builds a typed struct from a record.
///
/// ```ignore
/// struct User { id: i64, name: String }
///
/// impl FromRecord for User {
///     fn from_record(record: &Record) -> Result<Self> {
///         Ok(Self { id: record.try_get("id")?, name: record.try_get("name")? })
///     }
/// }
/// ```
pub trait FromRecord: Sized {
    /// Converts a record into `Self`.
    fn from_record(record: &Record) -> Result<Self>;
}

fn convert<T: FromSqlValue>(field: &str, value: &SqlValue) -> Result<T> {
    T::from_sql_value(value).ok_or_else(|| OrmError::TypeMismatch {
        field: field.to_string(),
        expected: T::EXPECTED.to_string(),
        found: value.kind(),
    })
}

/// One hydrated row of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    model: Model,
    // Field positions of `values` within the model.
    columns: Arc<[usize]>,
    values: Vec<SqlValue>,
}

impl Record {
    pub(crate) const fn new(model: Model, columns: Arc<[usize]>, values: Vec<SqlValue>) -> Self {
        Self {
            model,
            columns,
            values,
        }
    }

    /// Returns the model this record belongs to.
    #[must_use]
    pub const fn model(&self) -> &Model {
        &self.model
    }

    /// Returns the value of a field, if it was selected.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        let position = self.model.position(name)?;
        self.columns
            .iter()
            .position(|&c| c == position)
            .map(|i| &self.values[i])
    }

    /// Returns the value of a field converted to `T`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` when the field was not selected and
    /// `TypeMismatch` when its value does not convert.
    pub fn try_get<T: FromSqlValue>(&self, name: &str) -> Result<T> {
        let value = self.get(name).ok_or_else(|| OrmError::UnknownField {
            model: self.model.name().to_string(),
            field: name.to_string(),
        })?;
        convert(name, value)
    }

    /// Returns the primary key value, if it was selected.
    #[must_use]
    pub fn pk(&self) -> Option<&SqlValue> {
        self.get(&self.model.primary_key().name)
    }

    /// Returns the raw values in selection order.
    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Iterates over `(field name, value)` pairs in selection order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns
            .iter()
            .map(|&c| self.model.fields()[c].name.as_str())
            .zip(self.values.iter())
    }

    /// Converts this record into a typed entity.
    ///
    /// # Errors
    ///
    /// Returns whatever [`FromRecord::from_record`] reports.
    pub fn into_entity<T: FromRecord>(self) -> Result<T> {
        T::from_record(&self)
    }

    // The row this record was read from, addressed by primary key.
    fn row(&self) -> Result<QuerySet> {
        let pk = self.pk().ok_or_else(|| {
            OrmError::QueryError(format!(
                "record of '{}' was fetched without its primary key",
                self.model.name()
            ))
        })?;
        Ok(self.model.objects().by_pk(pk.clone()))
    }

    /// Writes `values` to this row and refreshes the record.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` when the row no longer exists, and with a
    /// build error when `values` do not fit the model.
    pub async fn update<B: Backend>(&mut self, db: &B, values: &Values) -> Result<()> {
        if self.row()?.update(db, values).await? == 0 {
            return Err(OrmError::NotFound);
        }
        for (name, value) in values.iter() {
            let slot = self
                .model
                .position(name)
                .and_then(|position| self.columns.iter().position(|&c| c == position));
            if let Some(i) = slot {
                self.values[i] = value.clone();
            }
        }
        Ok(())
    }

    /// Deletes this row.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` when the row no longer exists.
    pub async fn delete<B: Backend>(self, db: &B) -> Result<()> {
        if self.row()?.delete(db).await? == 0 {
            return Err(OrmError::NotFound);
        }
        Ok(())
    }
}

/// One row of an aggregate query: group-by values then aggregate results.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    names: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl AggregateRow {
    pub(crate) const fn new(names: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { names, values }
    }

    /// Returns a column by group field name or aggregate alias.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.values[i])
    }

    /// Returns a column converted to `T`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for an unknown column and `TypeMismatch`
    /// when its value does not convert.
    pub fn try_get<T: FromSqlValue>(&self, name: &str) -> Result<T> {
        let value = self.get(name).ok_or_else(|| OrmError::UnknownField {
            model: "aggregate".to_string(),
            field: name.to_string(),
        })?;
        convert(name, value)
    }

    /// Iterates over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.names.iter().map(String::as_str).zip(self.values.iter())
    }
}
