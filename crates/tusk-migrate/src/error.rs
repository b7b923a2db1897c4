//! Error types for the migration system.

use std::time::Duration;

use tusk_orm::OrmError;

/// Errors that can occur during migration operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// The live schema changed between Inspect and Apply.
    #[error("Schema changed since it was inspected (expected checksum {expected}, found {found})")]
    MigrationConflict {
        /// Checksum the plan was built from.
        expected: String,
        /// Checksum observed inside the migration transaction.
        found: String,
    },

    /// Another migration holds the advisory lock.
    #[error("Another migration holds the lock (waited {0:?})")]
    MigrationLocked(Duration),

    /// A planned step failed; the whole migration was rolled back.
    #[error("{description} failed: {source}")]
    StepFailed {
        /// Description of the failing step.
        description: String,
        /// Underlying database error.
        #[source]
        source: OrmError,
    },

    /// Database or model error.
    #[error(transparent)]
    Orm(#[from] OrmError),

    /// IO error (reading manifests, writing output).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Model manifest could not be parsed or written.
    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// Invalid migration state.
    #[error("Invalid migration state: {0}")]
    InvalidState(String),
}

impl From<sqlx::Error> for MigrateError {
    fn from(err: sqlx::Error) -> Self {
        Self::Orm(OrmError::from(err))
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failed_names_step() {
        let err = MigrateError::StepFailed {
            description: "Add column 'age' to table 'users'".to_string(),
            source: OrmError::QueryError("Cannot add a NOT NULL column".to_string()),
        };
        let message = err.to_string();
        assert!(message.starts_with("Add column 'age' to table 'users' failed"));
        assert!(message.contains("Cannot add a NOT NULL column"));
    }

    #[test]
    fn test_sqlx_error_wraps_orm_error() {
        let err: MigrateError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, MigrateError::Orm(OrmError::PoolTimeout)));
    }
}
