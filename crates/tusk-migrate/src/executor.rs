//! Migration executor.
//!
//! Runs the `Inspect → Diff → Plan → Apply → Commit | Rollback` cycle
//! against one database. Apply happens inside a single transaction on one
//! dedicated connection, under the advisory migration lock.

use std::time::Duration;

use chrono::Utc;
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, info, warn};
use tusk_orm::{Database, Model};

use crate::autodetector::{DiffOptions, Differ};
use crate::dialect::{MigrationDialect, SqliteDialect};
use crate::error::{MigrateError, Result};
use crate::history::{self, AppliedMigration};
use crate::introspect;
use crate::lock::{self, MigrationLock, DEFAULT_LEASE};
use crate::plan::{Plan, PlannedStep};
use crate::schema::CatalogSnapshot;

/// Migrator settings.
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// How long to wait for the migration lock.
    pub lock_timeout: Duration,
    /// How long a lock claim stays valid. Older claims are taken over.
    pub lock_lease: Duration,
    /// Differ options.
    pub diff: DiffOptions,
    /// Plan without applying.
    pub dry_run: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(10),
            lock_lease: DEFAULT_LEASE,
            diff: DiffOptions::default(),
            dry_run: false,
        }
    }
}

impl MigratorConfig {
    /// Set the lock timeout.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the lock lease.
    #[must_use]
    pub const fn with_lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }

    /// Set the differ options.
    #[must_use]
    pub const fn with_diff_options(mut self, diff: DiffOptions) -> Self {
        self.diff = diff;
        self
    }

    /// Only plan, never apply.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Outcome of a committed (or dry) migration run.
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    /// Steps applied, or planned on a dry run.
    pub steps: Vec<PlannedStep>,
    /// Drift reported by the differ.
    pub warnings: Vec<String>,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

impl MigrationReport {
    /// Returns true if nothing was (or would be) applied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Brings a database in line with a set of models.
pub struct Migrator {
    db: Database,
    dialect: Box<dyn MigrationDialect>,
    config: MigratorConfig,
}

impl Migrator {
    /// Creates a migrator with default settings.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self::with_config(db, MigratorConfig::default())
    }

    /// Creates a migrator with custom settings.
    #[must_use]
    pub fn with_config(db: Database, config: MigratorConfig) -> Self {
        Self {
            db,
            dialect: Box::new(SqliteDialect::new()),
            config,
        }
    }

    /// Returns the database.
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Inspects the live catalog.
    ///
    /// # Errors
    ///
    /// Fails when the catalog cannot be read.
    pub async fn inspect(&self) -> Result<CatalogSnapshot> {
        info!(phase = "inspect", "inspecting database");
        introspect::inspect_database(&self.db).await
    }

    /// Inspects, diffs and plans without taking the lock or applying.
    ///
    /// # Errors
    ///
    /// Fails when inspection fails or the plan cannot be rendered.
    pub async fn plan(&self, models: &[Model]) -> Result<Plan> {
        let snapshot = self.inspect().await?;

        info!(phase = "diff", models = models.len(), "diffing models against catalog");
        let diff = Differ::with_options(self.config.diff.clone()).diff(models, &snapshot);

        let plan = Plan::build(diff, &snapshot, self.dialect.as_ref())?;
        info!(
            phase = "plan",
            steps = plan.len(),
            warnings = plan.warnings.len(),
            "planned migration"
        );
        Ok(plan)
    }

    /// Applies a previously built plan under the migration lock.
    ///
    /// # Errors
    ///
    /// Fails with `MigrationConflict` if the catalog changed since the plan
    /// was built, with `MigrationLocked` if the lock cannot be taken, and
    /// with `StepFailed` if a statement fails. Nothing is committed then.
    pub async fn apply(&self, plan: &Plan) -> Result<MigrationReport> {
        let lock = self.lock().await?;
        let outcome = self.apply_locked(plan, &lock).await;
        unlock(lock).await;
        outcome
    }

    /// Runs the full cycle. The lock is taken before inspecting, so a
    /// migrator that waited for another one plans against its result.
    ///
    /// Cancelling the returned future rolls back any open transaction and
    /// releases the lock in the background.
    ///
    /// # Errors
    ///
    /// Same as [`Migrator::plan`] and [`Migrator::apply`].
    pub async fn migrate(&self, models: &[Model]) -> Result<MigrationReport> {
        if self.config.dry_run {
            let plan = self.plan(models).await?;
            return Ok(MigrationReport {
                steps: plan.steps,
                warnings: plan.warnings,
                dry_run: true,
            });
        }

        let lock = self.lock().await?;
        let outcome = match self.plan(models).await {
            Ok(plan) => self.apply_locked(&plan, &lock).await,
            Err(e) => Err(e),
        };
        unlock(lock).await;
        outcome
    }

    /// Lists applied steps.
    ///
    /// # Errors
    ///
    /// Fails when the history table cannot be read.
    pub async fn show_migrations(&self) -> Result<Vec<AppliedMigration>> {
        let mut conn = self.db.acquire().await?;
        history::list(&mut conn).await
    }

    async fn lock(&self) -> Result<MigrationLock> {
        MigrationLock::acquire(&self.db, self.config.lock_timeout, self.config.lock_lease).await
    }

    async fn apply_locked(&self, plan: &Plan, lock: &MigrationLock) -> Result<MigrationReport> {
        let report = MigrationReport {
            steps: plan.steps.clone(),
            warnings: plan.warnings.clone(),
            dry_run: false,
        };
        if plan.is_empty() {
            info!(phase = "commit", "schema is up to date");
            return Ok(report);
        }

        let mut conn = self.db.acquire().await?;
        let mut tx = conn.begin().await?;
        info!(phase = "apply", steps = plan.len(), "applying migration plan");

        match run_steps(&mut tx, plan, lock).await {
            Ok(()) => {
                tx.commit().await?;
                info!(phase = "commit", steps = plan.len(), "migration committed");
                Ok(report)
            }
            Err(e) => {
                warn!(phase = "rollback", error = %e, "migration failed, rolling back");
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

async fn unlock(lock: MigrationLock) {
    if let Err(e) = lock.release().await {
        warn!(error = %e, "failed to release migration lock");
    }
}

async fn run_steps(conn: &mut SqliteConnection, plan: &Plan, lock: &MigrationLock) -> Result<()> {
    lock::touch(&mut *conn, lock).await?;
    let current = introspect::inspect(&mut *conn).await?;
    let found = current.checksum();
    if found != plan.base_checksum {
        return Err(MigrateError::MigrationConflict {
            expected: plan.base_checksum.clone(),
            found,
        });
    }

    history::ensure_table(&mut *conn).await?;
    let applied_at = Utc::now();
    for step in &plan.steps {
        info!(id = step.id, risk = %step.risk, "{}", step.description);
        for sql in &step.statements {
            debug!(sql = %sql, "Executing SQL");
            sqlx::query(sql)
                .execute(&mut *conn)
                .await
                .map_err(|e| MigrateError::StepFailed {
                    description: step.description.clone(),
                    source: e.into(),
                })?;
        }
        history::record(&mut *conn, step.id, &step.description, applied_at).await?;
    }
    Ok(())
}
