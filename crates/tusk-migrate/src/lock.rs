//! Advisory migration lock.
//!
//! A single row in `tusk_migration_lock` marks a migration in progress.
//! Acquisition polls until the row can be claimed or the timeout elapses.
//!
//! Every claim carries a lease. A row whose `acquired_at` is older than the
//! lease belongs to a migrator that died and may be taken over. Dropping a
//! [`MigrationLock`] without releasing it deletes the row in the background.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use sqlx::SqliteConnection;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tusk_orm::{Database, OrmError};

use crate::error::{MigrateError, Result};

/// Name of the lock table.
pub const LOCK_TABLE: &str = "tusk_migration_lock";

/// How long a claim stays valid without being refreshed.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);

const CREATE_LOCK_TABLE_SQL: &str = r"
CREATE TABLE IF NOT EXISTS tusk_migration_lock (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    holder TEXT NOT NULL,
    acquired_at TEXT NOT NULL
)
";

// Claims the row when it is free or its lease has run out.
const CLAIM_SQL: &str = "INSERT INTO tusk_migration_lock (id, holder, acquired_at) VALUES (1, ?, ?) \
     ON CONFLICT(id) DO UPDATE SET holder = excluded.holder, acquired_at = excluded.acquired_at \
     WHERE tusk_migration_lock.acquired_at < ?";

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

static NEXT_HOLDER: AtomicU64 = AtomicU64::new(1);

/// A held migration lock.
///
/// Call [`MigrationLock::release`] when done. A lock that is dropped instead
/// (cancelled future, early return) is released by a background task.
#[derive(Debug)]
#[must_use = "the lock is released as soon as it is dropped"]
pub struct MigrationLock {
    holder: String,
    // Taken once the row is deleted.
    db: Option<Database>,
}

impl MigrationLock {
    /// Claims the lock, retrying until `timeout` elapses.
    ///
    /// A claim older than `lease` is considered abandoned and taken over.
    /// A busy database counts as contention.
    ///
    /// # Errors
    ///
    /// Returns `MigrationLocked` when the timeout elapses and passes on any
    /// other database error.
    pub async fn acquire(db: &Database, timeout: Duration, lease: Duration) -> Result<Self> {
        let holder = format!(
            "{}-{}",
            std::process::id(),
            NEXT_HOLDER.fetch_add(1, Ordering::Relaxed)
        );
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, try_claim(db, &holder, lease)).await {
                Ok(Ok(true)) => {
                    info!(holder = %holder, "acquired migration lock");
                    return Ok(Self {
                        holder,
                        db: Some(db.clone()),
                    });
                }
                Ok(Ok(false)) => debug!("migration lock is held, retrying"),
                Ok(Err(MigrateError::Orm(OrmError::Timeout(msg)))) => {
                    debug!(error = %msg, "database busy while claiming migration lock");
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {}
            }

            if Instant::now() + RETRY_INTERVAL > deadline {
                return Err(MigrateError::MigrationLocked(timeout));
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Returns the holder token stored in the lock row.
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Fails when the lock row cannot be deleted. The lock then expires
    /// with its lease.
    pub async fn release(mut self) -> Result<()> {
        if let Some(db) = &self.db {
            delete_claim(db, &self.holder).await?;
        }
        self.db = None;
        info!(holder = %self.holder, "released migration lock");
        Ok(())
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        let Some(db) = self.db.take() else {
            return;
        };
        let holder = std::mem::take(&mut self.holder);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(holder = %holder, "migration lock dropped outside a runtime, it expires with its lease");
            return;
        };
        warn!(holder = %holder, "migration lock dropped without release, releasing in background");
        runtime.spawn(async move {
            if let Err(e) = delete_claim(&db, &holder).await {
                warn!(holder = %holder, error = %e, "failed to release dropped migration lock");
            }
        });
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    // Fixed width, so timestamps compare correctly as text.
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn try_claim(db: &Database, holder: &str, lease: Duration) -> Result<bool> {
    sqlx::query(CREATE_LOCK_TABLE_SQL).execute(db.pool()).await?;
    let previous: Option<(String,)> =
        sqlx::query_as("SELECT holder FROM tusk_migration_lock WHERE id = 1")
            .fetch_optional(db.pool())
            .await?;

    let now = Utc::now();
    let stale_before = TimeDelta::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_sub_signed(lease))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let result = sqlx::query(CLAIM_SQL)
        .bind(holder)
        .bind(timestamp(now))
        .bind(timestamp(stale_before))
        .execute(db.pool())
        .await?;

    let claimed = result.rows_affected() == 1;
    if claimed {
        if let Some((stale,)) = previous {
            warn!(stale = %stale, "took over an expired migration lock");
        }
    }
    Ok(claimed)
}

async fn delete_claim(db: &Database, holder: &str) -> Result<()> {
    sqlx::query("DELETE FROM tusk_migration_lock WHERE id = 1 AND holder = ?")
        .bind(holder)
        .execute(db.pool())
        .await?;
    Ok(())
}

/// Renews the lease of `lock` from inside a transaction.
///
/// As the first statement of a transaction this also takes SQLite's write
/// lock before anything is read. Fails if the claim was taken over or
/// cleared in the meantime.
pub(crate) async fn touch(conn: &mut SqliteConnection, lock: &MigrationLock) -> Result<()> {
    let result =
        sqlx::query("UPDATE tusk_migration_lock SET acquired_at = ? WHERE id = 1 AND holder = ?")
            .bind(timestamp(Utc::now()))
            .bind(lock.holder())
            .execute(conn)
            .await?;
    if result.rows_affected() == 0 {
        return Err(MigrateError::InvalidState(format!(
            "Migration lock '{}' is no longer held",
            lock.holder()
        )));
    }
    Ok(())
}

/// Clears the lock whoever holds it. Returns true if a lock was held.
///
/// # Errors
///
/// Fails when the lock table cannot be written.
pub async fn force_release(db: &Database) -> Result<bool> {
    sqlx::query(CREATE_LOCK_TABLE_SQL).execute(db.pool()).await?;
    let result = sqlx::query("DELETE FROM tusk_migration_lock")
        .execute(db.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Connection;
    use tusk_orm::DatabaseConfig;

    async fn memory_db() -> Database {
        Database::connect(&DatabaseConfig::default()).await.unwrap()
    }

    async fn holders(db: &Database) -> Vec<String> {
        sqlx::query_as::<_, (String,)>("SELECT holder FROM tusk_migration_lock")
            .fetch_all(db.pool())
            .await
            .unwrap()
            .into_iter()
            .map(|(holder,)| holder)
            .collect()
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let db = memory_db().await;
        let lock = MigrationLock::acquire(&db, Duration::from_secs(1), DEFAULT_LEASE)
            .await
            .unwrap();
        assert_eq!(holders(&db).await, vec![lock.holder().to_string()]);
        lock.release().await.unwrap();
        assert!(holders(&db).await.is_empty());

        let again = MigrationLock::acquire(&db, Duration::from_secs(1), DEFAULT_LEASE)
            .await
            .unwrap();
        again.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_contention_fails_with_locked() {
        let db = memory_db().await;
        let held = MigrationLock::acquire(&db, Duration::from_secs(1), DEFAULT_LEASE)
            .await
            .unwrap();

        let err = MigrationLock::acquire(&db, Duration::from_millis(120), DEFAULT_LEASE)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::MigrationLocked(_)));

        held.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_lock_is_released() {
        let db = memory_db().await;
        let lock = MigrationLock::acquire(&db, Duration::from_secs(1), DEFAULT_LEASE)
            .await
            .unwrap();
        drop(lock);

        let next = MigrationLock::acquire(&db, Duration::from_secs(2), DEFAULT_LEASE)
            .await
            .unwrap();
        next.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_holder_releases_lock() {
        let db = memory_db().await;
        let hold_forever = async {
            let _lock = MigrationLock::acquire(&db, Duration::from_secs(1), DEFAULT_LEASE)
                .await
                .unwrap();
            std::future::pending::<()>().await;
        };
        assert!(tokio::time::timeout(Duration::from_millis(100), hold_forever)
            .await
            .is_err());

        let next = MigrationLock::acquire(&db, Duration::from_secs(2), DEFAULT_LEASE)
            .await
            .unwrap();
        next.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let db = memory_db().await;
        let crashed = MigrationLock::acquire(&db, Duration::from_secs(1), DEFAULT_LEASE)
            .await
            .unwrap();
        let crashed_holder = crashed.holder().to_string();
        // A process that died never runs its destructor.
        std::mem::forget(crashed);

        let err = MigrationLock::acquire(&db, Duration::from_millis(150), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::MigrationLocked(_)));

        let lock = MigrationLock::acquire(&db, Duration::from_secs(2), Duration::from_millis(100))
            .await
            .unwrap();
        assert_ne!(lock.holder(), crashed_holder);
        assert_eq!(holders(&db).await, vec![lock.holder().to_string()]);
        lock.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_touch_detects_lost_lock() {
        let db = memory_db().await;
        let lock = MigrationLock::acquire(&db, Duration::from_secs(1), DEFAULT_LEASE)
            .await
            .unwrap();
        {
            let mut conn = db.acquire().await.unwrap();
            touch(&mut conn, &lock).await.unwrap();
        }

        assert!(force_release(&db).await.unwrap());
        let mut conn = db.acquire().await.unwrap();
        let mut tx = conn.begin().await.unwrap();
        let err = touch(&mut tx, &lock).await.unwrap_err();
        assert!(matches!(err, MigrateError::InvalidState(_)));
        tx.rollback().await.unwrap();
        drop(conn);
        lock.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_force_release() {
        let db = memory_db().await;
        assert!(!force_release(&db).await.unwrap());
        let stale = MigrationLock::acquire(&db, Duration::from_secs(1), DEFAULT_LEASE)
            .await
            .unwrap();
        std::mem::forget(stale);
        assert!(force_release(&db).await.unwrap());
        let fresh = MigrationLock::acquire(&db, Duration::from_millis(100), DEFAULT_LEASE)
            .await
            .unwrap();
        fresh.release().await.unwrap();
    }
}
