//! Management commands.
//!
//! Each command writes its human-readable output to a writer and reports an
//! exit code, so the binary and tests share one code path.

use std::io::Write;

use tusk_orm::{Database, Model};

use crate::error::Result;
use crate::executor::{MigrationReport, Migrator, MigratorConfig};
use crate::introspect;
use crate::lock;
use crate::manifest::ModelManifest;

/// A management command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Bring the database in line with the models.
    Migrate {
        /// Plan and print without applying.
        dry_run: bool,
        /// Drop tables no model maps to.
        drop_unknown_tables: bool,
    },
    /// Print the applied migration history.
    ShowMigrations,
    /// Print the SQL a migration would run.
    SqlMigrate,
    /// Print a model manifest describing the live catalog.
    InspectDb {
        /// Restrict output to these tables.
        tables: Vec<String>,
    },
    /// Clear a stale migration lock.
    Unlock,
}

impl Command {
    /// Returns true if the command needs registered models.
    #[must_use]
    pub const fn needs_models(&self) -> bool {
        matches!(self, Self::Migrate { .. } | Self::SqlMigrate)
    }
}

/// Runs a command and returns its exit code: 0 on success, 1 on failure.
///
/// Failures are printed to `out`, including the failing step of a
/// rolled-back migration.
pub async fn dispatch<W: Write + Send>(
    command: &Command,
    db: &Database,
    models: &[Model],
    config: MigratorConfig,
    out: &mut W,
) -> i32 {
    match run(command, db, models, config, out).await {
        Ok(()) => 0,
        Err(e) => {
            if writeln!(out, "Error: {e}").is_err() {
                eprintln!("Error: {e}");
            }
            1
        }
    }
}

/// Runs a command, propagating its error.
///
/// # Errors
///
/// Fails when the command fails or `out` cannot be written.
pub async fn run<W: Write + Send>(
    command: &Command,
    db: &Database,
    models: &[Model],
    config: MigratorConfig,
    out: &mut W,
) -> Result<()> {
    match command {
        Command::Migrate {
            dry_run,
            drop_unknown_tables,
        } => {
            let mut config = config.with_dry_run(*dry_run);
            config.diff.drop_unknown_tables |= *drop_unknown_tables;
            let report = Migrator::with_config(db.clone(), config).migrate(models).await?;
            write_report(&report, out)?;
        }

        Command::ShowMigrations => {
            let applied = Migrator::with_config(db.clone(), config)
                .show_migrations()
                .await?;
            if applied.is_empty() {
                writeln!(out, "No migrations have been applied yet.")?;
            }
            for migration in &applied {
                writeln!(
                    out,
                    " [X] {:>4} {} ({})",
                    migration.id,
                    migration.description,
                    migration.applied_at.format("%Y-%m-%d %H:%M:%S")
                )?;
            }
        }

        Command::SqlMigrate => {
            let plan = Migrator::with_config(db.clone(), config).plan(models).await?;
            if plan.is_empty() {
                writeln!(out, "-- No changes detected")?;
            } else {
                write!(out, "{}", plan.to_sql())?;
            }
        }

        Command::InspectDb { tables } => {
            let catalog = introspect::inspect_database(db).await?;
            let (manifest, _warnings) = ModelManifest::from_catalog(&catalog, tables);
            writeln!(out, "{}", manifest.to_json()?)?;
        }

        Command::Unlock => {
            if lock::force_release(db).await? {
                writeln!(out, "Migration lock released.")?;
            } else {
                writeln!(out, "No migration lock was held.")?;
            }
        }
    }
    Ok(())
}

fn write_report<W: Write>(report: &MigrationReport, out: &mut W) -> Result<()> {
    for warning in &report.warnings {
        writeln!(out, "Warning: {warning}")?;
    }
    if report.is_empty() {
        writeln!(out, "No changes detected.")?;
        return Ok(());
    }

    let verb = if report.dry_run { "Would apply" } else { "Applied" };
    for step in &report.steps {
        writeln!(out, "  {verb} {}: {} [{}]", step.id, step.description, step.risk)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tusk_orm::{DatabaseConfig, Field, FieldType, Registry};

    async fn setup() -> (Database, Vec<Model>) {
        let db = Database::connect(&DatabaseConfig::default()).await.unwrap();
        let registry = Registry::new();
        registry
            .register(
                "User",
                vec![
                    Field::new("id", FieldType::Integer).primary_key().auto(),
                    Field::new("email", FieldType::Text).unique(),
                ],
            )
            .unwrap();
        (db, registry.models())
    }

    async fn exec(command: Command, db: &Database, models: &[Model]) -> (i32, String) {
        let mut out = Vec::new();
        let code = dispatch(&command, db, models, MigratorConfig::default(), &mut out).await;
        (code, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn test_sqlmigrate_then_migrate() {
        let (db, models) = setup().await;

        let (code, sql) = exec(Command::SqlMigrate, &db, &models).await;
        assert_eq!(code, 0);
        assert!(sql.contains("CREATE TABLE \"users\""));
        assert!(sql.contains("CREATE UNIQUE INDEX \"uq_users_email\""));

        let migrate = Command::Migrate {
            dry_run: false,
            drop_unknown_tables: false,
        };
        let (code, output) = exec(migrate.clone(), &db, &models).await;
        assert_eq!(code, 0);
        assert!(output.contains("Applied 1: Create table 'users'"));
        assert!(output.contains("Applied 2: Add unique constraint 'uq_users_email'"));

        let (_, output) = exec(migrate, &db, &models).await;
        assert!(output.contains("No changes detected."));

        let (code, history) = exec(Command::ShowMigrations, &db, &[]).await;
        assert_eq!(code, 0);
        assert_eq!(history.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_inspectdb_and_unlock() {
        let (db, models) = setup().await;
        let (_, empty) = exec(Command::ShowMigrations, &db, &[]).await;
        assert!(empty.contains("No migrations"));

        exec(
            Command::Migrate {
                dry_run: false,
                drop_unknown_tables: false,
            },
            &db,
            &models,
        )
        .await;

        let (code, json) = exec(Command::InspectDb { tables: vec![] }, &db, &[]).await;
        assert_eq!(code, 0);
        let manifest = ModelManifest::from_json(&json).unwrap();
        assert_eq!(manifest.models[0].name, "User");

        let (code, output) = exec(Command::Unlock, &db, &[]).await;
        assert_eq!(code, 0);
        assert!(output.contains("No migration lock was held."));
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unwritable_output_still_fails() {
        let (db, models) = setup().await;
        let code = dispatch(
            &Command::SqlMigrate,
            &db,
            &models,
            MigratorConfig::default(),
            &mut ClosedPipe,
        )
        .await;
        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn test_failure_exit_code() {
        let (db, models) = setup().await;
        let _held = lock::MigrationLock::acquire(
            &db,
            std::time::Duration::from_secs(1),
            lock::DEFAULT_LEASE,
        )
        .await
        .unwrap();
        let mut out = Vec::new();
        let code = dispatch(
            &Command::Migrate {
                dry_run: false,
                drop_unknown_tables: false,
            },
            &db,
            &models,
            MigratorConfig::default().with_lock_timeout(std::time::Duration::from_millis(100)),
            &mut out,
        )
        .await;
        assert_eq!(code, 1);
        assert!(String::from_utf8(out).unwrap().starts_with("Error: Another migration holds the lock"));
    }
}
