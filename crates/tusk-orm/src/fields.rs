//! Field definitions for model declarations.
//!
//! Fields are declared once, validated at registration time and never
//! mutated afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{SqlValue, ValueKind};

/// Logical column types supported by the ORM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Double precision float.
    Real,
    /// Boolean, stored as 0/1.
    Boolean,
    /// Unbounded text.
    Text,
    /// Text with a declared maximum length.
    Varchar(u32),
    /// UUID stored in its 36-character text form.
    Uuid,
    /// Date and time (UTC).
    Timestamp,
    /// Calendar date.
    Date,
    /// Binary data.
    Blob,
}

impl FieldType {
    /// Returns the declared SQL column type.
    #[must_use]
    pub fn sql_type(&self) -> String {
        match self {
            Self::Integer => "INTEGER".to_string(),
            Self::BigInt => "BIGINT".to_string(),
            Self::Real => "REAL".to_string(),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::Text => "TEXT".to_string(),
            Self::Varchar(len) => format!("VARCHAR({len})"),
            Self::Uuid => "CHAR(36)".to_string(),
            Self::Timestamp => "DATETIME".to_string(),
            Self::Date => "DATE".to_string(),
            Self::Blob => "BLOB".to_string(),
        }
    }

    /// Maps a declared SQL column type back to a logical type.
    ///
    /// Unknown declarations fall back to SQLite's affinity rules.
    #[must_use]
    pub fn from_sql_type(declared: &str) -> Self {
        let upper = declared.trim().to_ascii_uppercase();
        match upper.as_str() {
            "INTEGER" | "INT" | "SMALLINT" => Self::Integer,
            "BIGINT" => Self::BigInt,
            "REAL" | "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" => Self::Real,
            "BOOLEAN" | "BOOL" => Self::Boolean,
            "TEXT" => Self::Text,
            "CHAR(36)" | "UUID" => Self::Uuid,
            "DATETIME" | "TIMESTAMP" => Self::Timestamp,
            "DATE" => Self::Date,
            "BLOB" => Self::Blob,
            _ => upper
                .strip_prefix("VARCHAR(")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(|n| n.trim().parse().ok())
                .map_or_else(|| Self::by_affinity(&upper), Self::Varchar),
        }
    }

    fn by_affinity(upper: &str) -> Self {
        if upper.contains("INT") {
            Self::BigInt
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Self::Text
        } else if upper.contains("BLOB") || upper.is_empty() {
            Self::Blob
        } else {
            Self::Real
        }
    }

    /// Returns true for types that `SUM`/`AVG` can operate on.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::BigInt | Self::Real)
    }

    /// Returns the bare type name, without length.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::BigInt => "bigint",
            Self::Real => "real",
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::Varchar(_) => "varchar",
            Self::Uuid => "uuid",
            Self::Timestamp => "timestamp",
            Self::Date => "date",
            Self::Blob => "blob",
        }
    }

    /// Returns how values of this type are decoded from a row.
    #[must_use]
    pub const fn value_kind(&self) -> ValueKind {
        match self {
            Self::Integer | Self::BigInt => ValueKind::Integer,
            Self::Real => ValueKind::Real,
            Self::Boolean => ValueKind::Boolean,
            Self::Text | Self::Varchar(_) | Self::Uuid => ValueKind::Text,
            Self::Timestamp => ValueKind::Timestamp,
            Self::Date => ValueKind::Date,
            Self::Blob => ValueKind::Blob,
        }
    }

    /// Returns whether a non-null literal can be bound against this type.
    #[must_use]
    pub fn accepts(&self, value: &SqlValue) -> bool {
        match (self, value) {
            (Self::Varchar(len), SqlValue::Text(s)) => {
                usize::try_from(*len).is_ok_and(|max| s.chars().count() <= max)
            }
            (Self::Uuid, SqlValue::Text(s)) => looks_like_uuid(s),
            (Self::Integer | Self::BigInt, SqlValue::Int(_))
            | (Self::Real, SqlValue::Float(_) | SqlValue::Int(_))
            | (Self::Boolean, SqlValue::Bool(_))
            | (Self::Text, SqlValue::Text(_))
            | (Self::Timestamp, SqlValue::Timestamp(_))
            | (Self::Date, SqlValue::Date(_))
            | (Self::Blob, SqlValue::Blob(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Varchar(len) => write!(f, "varchar({len})"),
            other => f.write_str(other.type_name()),
        }
    }
}

fn looks_like_uuid(s: &str) -> bool {
    s.len() == 36
        && s.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

/// Default value declared for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// NULL default.
    Null,
    /// Boolean default.
    Bool(bool),
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// String default.
    String(String),
    /// SQL expression (e.g., "CURRENT_TIMESTAMP").
    Expression(String),
}

impl DefaultValue {
    /// Returns the SQL representation of this default value.
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Expression(expr) => expr.clone(),
        }
    }
}

/// A typed column declaration.
///
/// ```ignore
/// use tusk_orm::{DefaultValue, Field, FieldType};
///
/// let fields = vec![
///     Field::new("id", FieldType::Integer).primary_key().auto(),
///     Field::new("name", FieldType::Text),
///     Field::new("age", FieldType::Integer).default(DefaultValue::Integer(30)),
/// ];
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Field {
    /// Column name.
    pub name: String,
    /// Logical type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether NULL is allowed.
    #[serde(default)]
    pub nullable: bool,
    /// Declared default.
    #[serde(default)]
    pub default: Option<DefaultValue>,
    /// Whether a unique constraint applies.
    #[serde(default)]
    pub unique: bool,
    /// Whether this is the primary key.
    #[serde(default)]
    pub primary_key: bool,
    /// Whether the database assigns the value on insert.
    #[serde(default)]
    pub auto: bool,
    /// Previous column name, used by the migration differ to emit a rename.
    #[serde(default)]
    pub renamed_from: Option<String>,
}

impl Field {
    /// Creates a NOT NULL field with no default.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            default: None,
            unique: false,
            primary_key: false,
            auto: false,
            renamed_from: None,
        }
    }

    /// Allows NULL values.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Adds a unique constraint.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the field as primary key. Primary keys are never nullable.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Assigns the value on insert when none is supplied.
    ///
    /// Integer primary keys are assigned by the database. UUID fields get a
    /// random (v4) value generated before the insert is sent.
    #[must_use]
    pub const fn auto(mut self) -> Self {
        self.auto = true;
        self
    }

    /// Records the previous column name for a rename migration.
    #[must_use]
    pub fn renamed_from(mut self, old_name: impl Into<String>) -> Self {
        self.renamed_from = Some(old_name.into());
        self
    }

    /// Returns the declared column type.
    ///
    /// Database-assigned keys are always `INTEGER` so that SQLite aliases
    /// them to the rowid.
    #[must_use]
    pub fn sql_type(&self) -> String {
        if self.auto && self.primary_key && !self.generates_uuid() {
            "INTEGER".to_string()
        } else {
            self.field_type.sql_type()
        }
    }

    /// Returns true when inserts fill in a fresh v4 UUID for this field.
    #[must_use]
    pub fn generates_uuid(&self) -> bool {
        self.auto && self.field_type == FieldType::Uuid
    }

    /// Returns true when an insert must supply a value.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none() && !self.auto
    }

    /// Checks a literal against this field's type and nullability.
    #[must_use]
    pub fn accepts(&self, value: &SqlValue) -> bool {
        if value.is_null() {
            self.nullable
        } else {
            self.field_type.accepts(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_type_round_trip() {
        for ty in [
            FieldType::Integer,
            FieldType::BigInt,
            FieldType::Real,
            FieldType::Boolean,
            FieldType::Text,
            FieldType::Varchar(64),
            FieldType::Uuid,
            FieldType::Timestamp,
            FieldType::Date,
            FieldType::Blob,
        ] {
            assert_eq!(FieldType::from_sql_type(&ty.sql_type()), ty);
        }
    }

    #[test]
    fn test_affinity_fallback() {
        assert_eq!(FieldType::from_sql_type("MEDIUMINT"), FieldType::BigInt);
        assert_eq!(FieldType::from_sql_type("nvarchar"), FieldType::Text);
        assert_eq!(FieldType::from_sql_type(""), FieldType::Blob);
        assert_eq!(FieldType::from_sql_type("NUMERIC"), FieldType::Real);
    }

    #[test]
    fn test_accepts() {
        assert!(FieldType::Real.accepts(&SqlValue::Int(1)));
        assert!(!FieldType::Integer.accepts(&SqlValue::Float(1.5)));
        assert!(!FieldType::Varchar(3).accepts(&SqlValue::Text("abcd".into())));
        assert!(FieldType::Uuid.accepts(&SqlValue::Text(
            "123e4567-e89b-12d3-a456-426614174000".into()
        )));
        assert!(!FieldType::Uuid.accepts(&SqlValue::Text("not-a-uuid".into())));
    }

    #[test]
    fn test_field_nullability() {
        let field = Field::new("bio", FieldType::Text);
        assert!(!field.accepts(&SqlValue::Null));
        assert!(field.nullable().accepts(&SqlValue::Null));
    }

    #[test]
    fn test_required() {
        assert!(Field::new("name", FieldType::Text).is_required());
        assert!(!Field::new("id", FieldType::Integer).primary_key().auto().is_required());
        assert!(!Field::new("age", FieldType::Integer)
            .default(DefaultValue::Integer(30))
            .is_required());
    }

    #[test]
    fn test_auto_key_is_integer() {
        let field = Field::new("id", FieldType::BigInt).primary_key().auto();
        assert_eq!(field.sql_type(), "INTEGER");
    }

    #[test]
    fn test_uuid_key_is_generated() {
        let field = Field::new("id", FieldType::Uuid).primary_key().auto();
        assert!(field.generates_uuid());
        assert!(!field.is_required());
        assert_eq!(field.sql_type(), "CHAR(36)");
        assert!(!Field::new("id", FieldType::Integer).auto().generates_uuid());
    }

    #[test]
    fn test_default_value_to_sql() {
        assert_eq!(DefaultValue::Bool(true).to_sql(), "1");
        assert_eq!(DefaultValue::String("it's".into()).to_sql(), "'it''s'");
        assert_eq!(
            DefaultValue::Expression("CURRENT_TIMESTAMP".into()).to_sql(),
            "CURRENT_TIMESTAMP"
        );
    }
}
