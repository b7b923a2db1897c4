//! Schema diffing and transactional migrations for tusk-orm.
//!
//! `tusk-migrate` compares the registered models against the live SQLite
//! catalog and applies the forward DDL that reconciles them:
//!
//! - **Inspect** reads tables, columns, indexes and the history head
//! - **Diff** turns differences into [`DiffOperation`]s
//! - **Plan** orders operations by phase and renders their SQL
//! - **Apply** runs the plan in one transaction under an advisory lock,
//!   recording every step in `tusk_migrations`
//!
//! A failed step rolls the whole migration back; callers see either a
//! committed [`MigrationReport`] or an error naming the failing step.
//!
//! # Example
//!
//! ```rust,ignore
//! use tusk_migrate::{Migrator, MigratorConfig};
//! use tusk_orm::{Database, DatabaseConfig, Registry};
//!
//! let db = Database::connect(&DatabaseConfig::new("sqlite://app.db")).await?;
//! let report = Migrator::new(db).migrate(&Registry::global().models()).await?;
//! for step in &report.steps {
//!     println!("{} {}", step.id, step.description);
//! }
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Apply pending schema changes
//! tusk-migrate --models models.json migrate
//!
//! # Show the SQL without applying it
//! tusk-migrate --models models.json sqlmigrate
//!
//! # Describe an existing database as a model manifest
//! tusk-migrate inspectdb > models.json
//! ```

pub mod autodetector;
pub mod commands;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod history;
pub mod introspect;
pub mod lock;
pub mod manifest;
pub mod operations;
pub mod plan;
pub mod schema;
pub mod state;

pub use autodetector::{Diff, DiffOptions, Differ};
pub use commands::{dispatch, Command};
pub use dialect::{MigrationDialect, SqliteDialect};
pub use error::{MigrateError, Result};
pub use executor::{MigrationReport, Migrator, MigratorConfig};
pub use history::AppliedMigration;
pub use introspect::inspect;
pub use lock::MigrationLock;
pub use manifest::{ModelEntry, ModelManifest};
pub use operations::{DiffOperation, Risk};
pub use plan::{Plan, PlannedStep};
pub use schema::{CatalogSnapshot, ColumnSchema, IndexOrigin, IndexSchema, TableSchema};
