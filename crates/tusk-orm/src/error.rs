//! Error types for the ORM.
//!
//! Model-declaration and query-build errors are raised locally before any
//! I/O. Driver errors are classified by the `From<sqlx::Error>` impl and are
//! never retried.

use thiserror::Error;

/// ORM-specific errors.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Two fields of a model share a name.
    #[error("duplicate field '{field}' on model '{model}'")]
    DuplicateField {
        /// Model being registered.
        model: String,
        /// Repeated field name.
        field: String,
    },

    /// No field is marked as primary key.
    #[error("model '{0}' has no primary key")]
    NoPrimaryKey(String),

    /// More than one field is marked as primary key.
    #[error("model '{model}' has multiple primary keys: {}", .fields.join(", "))]
    MultiplePrimaryKeys {
        /// Model being registered.
        model: String,
        /// Fields marked as primary key.
        fields: Vec<String>,
    },

    /// An entity, table or field name is not a plain SQL identifier.
    #[error("invalid identifier: {0:?}")]
    InvalidName(String),

    /// A query or insert references a field the model does not declare.
    #[error("unknown field '{field}' on model '{model}'")]
    UnknownField {
        /// Model queried.
        model: String,
        /// Offending field name.
        field: String,
    },

    /// A literal is incompatible with the field's declared type.
    #[error("type mismatch on field '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        /// Field the literal was supplied for.
        field: String,
        /// Declared logical type.
        expected: String,
        /// Kind of the supplied value.
        found: &'static str,
    },

    /// A required field was not supplied on create.
    #[error("missing required field '{field}' on model '{model}'")]
    MissingField {
        /// Model being inserted into.
        model: String,
        /// Required field name.
        field: String,
    },

    /// The database rejected a write because of a constraint.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The connection failed or was lost.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// A statement did not complete in time, or the database stayed busy.
    #[error("timeout: {0}")]
    Timeout(String),

    /// No pooled connection became available within the acquire timeout.
    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,

    /// Any other statement failure.
    #[error("query error: {0}")]
    QueryError(String),

    /// No object found matching the query.
    #[error("object not found")]
    NotFound,

    /// Multiple objects found when exactly one was expected.
    #[error("multiple objects returned when one was expected")]
    MultipleObjectsReturned,
}

impl OrmError {
    /// Returns true for errors raised before any statement was sent.
    #[must_use]
    pub const fn is_build_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateField { .. }
                | Self::NoPrimaryKey(_)
                | Self::MultiplePrimaryKeys { .. }
                | Self::InvalidName(_)
                | Self::UnknownField { .. }
                | Self::TypeMismatch { .. }
                | Self::MissingField { .. }
        )
    }
}

// SQLITE_BUSY, SQLITE_LOCKED and their extended codes.
const BUSY_CODES: &[&str] = &["5", "6", "261", "262", "517"];

impl From<sqlx::Error> for OrmError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        match err {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::Io(e) => Self::ConnectionError(e.to_string()),
            sqlx::Error::Tls(e) => Self::ConnectionError(e.to_string()),
            sqlx::Error::PoolClosed => Self::ConnectionError("pool is closed".to_string()),
            sqlx::Error::WorkerCrashed => {
                Self::ConnectionError("database worker crashed".to_string())
            }
            sqlx::Error::Protocol(msg) => Self::ConnectionError(msg),
            sqlx::Error::Database(db) => {
                let message = db.message().to_string();
                match db.kind() {
                    ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation => Self::ConstraintViolation(message),
                    _ => {
                        let busy = db
                            .code()
                            .is_some_and(|code| BUSY_CODES.contains(&code.as_ref()));
                        if busy {
                            Self::Timeout(message)
                        } else {
                            Self::QueryError(message)
                        }
                    }
                }
            }
            other => Self::QueryError(other.to_string()),
        }
    }
}

/// Result type alias for ORM operations.
pub type Result<T> = std::result::Result<T, OrmError>;
