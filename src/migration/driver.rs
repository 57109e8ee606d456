//! Migration driver
//!
//! Runs one migration direction against one connection.
//!
//! `Up`, `Force` and `DownOne` hold the lock row for the whole run:
//!
//! 1. consolidate bookkeeping filenames
//! 2. `Up` only: return early when nothing is unrun, otherwise wait for the lock to clear
//! 3. take the lock row with a committed statement
//! 4. `BEGIN`, dispatch on the direction, commit on success and roll back otherwise
//! 5. release the lock row with a committed statement
//!
//! Steps 1 to 3 run in auto-commit mode, so every read sees what other connections have
//! committed. `Print` and `ReleaseLocks` skip the lock and only run step 4.
//!
//! Lock failures return as-is. Any other failure of a mutating run force-clears the
//! lock (best effort) after the rollback, then the error is returned.

use crate::changelog::Changelog;
use crate::connection::{connect, ConnectionDetails};
use crate::engine::{ChangelogEngine, SqlChangelogEngine};
use crate::executor::DockExecutor;
use crate::migration::consolidation::consolidate_changesets;
use crate::migration::lock::LockCoordinator;
use crate::migration::{MigrationError, MigrationStatus};
use crate::retry::{RetryPolicy, LOCK_WAIT, UPDATE_BATCH};
use crate::transaction::MigrationTransaction;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// What a migration run does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Apply unrun changesets
    Up,
    /// Apply unrun changesets one statement at a time, skipping failing statements
    Force,
    /// Roll back the most recently applied changeset
    DownOne,
    /// Produce the SQL `Up` would run, without running it
    Print,
    /// Clear the migration lock
    ReleaseLocks,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Force => "force",
            Direction::DownOne => "down-one",
            Direction::Print => "print",
            Direction::ReleaseLocks => "release-locks",
        }
    }

    /// Whether a successful run commits
    pub fn is_mutating(self) -> bool {
        !matches!(self, Direction::Print)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "up" | "migrate" => Ok(Direction::Up),
            "force" => Ok(Direction::Force),
            "down-one" | "rollback" => Ok(Direction::DownOne),
            "print" => Ok(Direction::Print),
            "release-locks" => Ok(Direction::ReleaseLocks),
            other => Err(format!("unknown migration direction '{other}'")),
        }
    }
}

/// Result of one migration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// `Up` found nothing to apply
    UpToDate,
    Applied {
        count: usize,
    },
    Forced {
        applied: usize,
        failed_statements: usize,
    },
    /// `DownOne`; `None` when nothing had been applied
    RolledBack {
        id: Option<String>,
    },
    PendingSql {
        changesets: Vec<String>,
        sql: String,
    },
    LocksReleased,
}

/// Anything that can run a migration direction against a database
///
/// Setup depends on this rather than on [`MigrationDriver`] so it can be given a
/// different migrator.
pub trait SchemaMigrator: Send + Sync {
    fn migrate(
        &self,
        details: &ConnectionDetails,
        direction: Direction,
    ) -> Result<MigrationOutcome, MigrationError>;
}

/// Runs migration directions for one changelog
#[derive(Debug, Clone)]
pub struct MigrationDriver {
    changelog: Changelog,
    lock_policy: RetryPolicy,
    update_policy: RetryPolicy,
}

impl MigrationDriver {
    pub fn new(changelog: Changelog) -> Self {
        Self {
            changelog,
            lock_policy: LOCK_WAIT,
            update_policy: UPDATE_BATCH,
        }
    }

    /// Override the lock wait policy (default: 5 checks, 2 s apart)
    #[must_use]
    pub fn with_lock_policy(mut self, policy: RetryPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    /// Override the batch retry policy of `Up` (default: 3 attempts)
    #[must_use]
    pub fn with_update_policy(mut self, policy: RetryPolicy) -> Self {
        self.update_policy = policy;
        self
    }

    pub fn changelog(&self) -> &Changelog {
        &self.changelog
    }

    /// Open a connection for `details` and run `direction` on it
    pub fn migrate(
        &self,
        details: &ConnectionDetails,
        direction: Direction,
    ) -> Result<MigrationOutcome, MigrationError> {
        let executor = connect(details)?;
        self.migrate_with(executor.as_ref(), direction)
    }

    /// Run `direction` on an already-open connection
    ///
    /// The connection must be in auto-commit mode, not inside a transaction.
    ///
    /// # Errors
    ///
    /// - `MigrationError::LockTimeout` if `Up` waited out the lock
    /// - `MigrationError::Engine` for engine failures (bad SQL, checksum mismatch,
    ///   missing rollback, or `LockHeld` when another process holds the lock row)
    /// - `MigrationError::Transaction` if BEGIN/COMMIT/ROLLBACK failed
    pub fn migrate_with(
        &self,
        executor: &dyn DockExecutor,
        direction: Direction,
    ) -> Result<MigrationOutcome, MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::migrate_span(direction.as_str()).entered();

        let start = Instant::now();
        let engine = SqlChangelogEngine::new(executor, &self.changelog);
        let lock = LockCoordinator::with_policy(&engine, self.lock_policy);

        let result = match direction {
            Direction::Up | Direction::Force | Direction::DownOne => {
                self.run_locked(executor, &engine, &lock, direction)
            }
            Direction::Print | Direction::ReleaseLocks => {
                self.run_in_transaction(executor, &engine, direction)
            }
        };

        match result {
            Ok(outcome) => {
                #[cfg(feature = "metrics")]
                METRICS.record_migration(direction.as_str(), start.elapsed());
                log::debug!("Migration {direction} finished in {:?}", start.elapsed());
                Ok(outcome)
            }
            Err(err) if err.is_lock_failure() => Err(err),
            Err(err) => {
                if direction.is_mutating() {
                    lock.force_clear();
                }
                log::error!(
                    "Migration {direction} failed after {:?}: {err}",
                    start.elapsed()
                );
                Err(err)
            }
        }
    }

    /// Applied and pending changesets plus held locks; nothing is written
    pub fn status(&self, details: &ConnectionDetails) -> Result<MigrationStatus, MigrationError> {
        let executor = connect(details)?;
        self.status_with(executor.as_ref())
    }

    pub fn status_with(&self, executor: &dyn DockExecutor) -> Result<MigrationStatus, MigrationError> {
        let tx = MigrationTransaction::begin(executor).map_err(MigrationError::Transaction)?;
        let engine = SqlChangelogEngine::new(executor, &self.changelog);
        let status = (|| -> Result<MigrationStatus, MigrationError> {
            let pending = engine.unrun_changesets()?.into_iter().map(|cs| cs.id).collect();
            Ok(MigrationStatus::new(
                engine.applied_changesets()?,
                pending,
                engine.list_locks()?,
            ))
        })();
        tx.rollback().map_err(MigrationError::Transaction)?;
        status
    }

    /// Hold the lock row around a transactional run of `direction`
    fn run_locked(
        &self,
        executor: &dyn DockExecutor,
        engine: &SqlChangelogEngine<'_>,
        lock: &LockCoordinator<'_>,
        direction: Direction,
    ) -> Result<MigrationOutcome, MigrationError> {
        consolidate_changesets(engine)?;
        if direction == Direction::Up {
            if engine.unrun_changesets()?.is_empty() {
                log::debug!("Database schema is up to date");
                return Ok(MigrationOutcome::UpToDate);
            }
            lock.wait_for_clear()?;
        }

        engine.acquire_lock()?;
        let result = self.run_in_transaction(executor, engine, direction);
        if let Err(e) = engine.release_lock() {
            log::warn!("Failed to release migration lock: {e}");
            lock.force_clear();
        }
        result
    }

    /// Run `direction` inside one transaction that commits only a successful
    /// mutating run
    fn run_in_transaction(
        &self,
        executor: &dyn DockExecutor,
        engine: &dyn ChangelogEngine,
        direction: Direction,
    ) -> Result<MigrationOutcome, MigrationError> {
        let mut tx = MigrationTransaction::begin(executor).map_err(MigrationError::Transaction)?;
        let result = consolidate_changesets(engine)
            .map_err(MigrationError::from)
            .and_then(|()| self.dispatch(engine, &tx, direction));

        match result {
            Ok(outcome) => {
                if direction.is_mutating() {
                    tx.mark_success();
                }
                tx.finish().map_err(MigrationError::Transaction)?;
                Ok(outcome)
            }
            Err(err) => {
                rollback_quietly(tx);
                Err(err)
            }
        }
    }

    fn dispatch(
        &self,
        engine: &dyn ChangelogEngine,
        tx: &MigrationTransaction<'_>,
        direction: Direction,
    ) -> Result<MigrationOutcome, MigrationError> {
        match direction {
            Direction::Up => self.up(engine, tx),
            Direction::Force => force(engine, tx),
            Direction::DownOne => Ok(MigrationOutcome::RolledBack {
                id: engine.rollback_one()?,
            }),
            Direction::Print => {
                let pending = engine.pending_sql()?;
                Ok(MigrationOutcome::PendingSql {
                    changesets: pending.changesets,
                    sql: pending.sql,
                })
            }
            Direction::ReleaseLocks => {
                engine.force_release_locks()?;
                Ok(MigrationOutcome::LocksReleased)
            }
        }
    }

    /// Apply what is still unrun; the lock is held and the transaction is fresh, so
    /// this sees everything a previous holder committed
    fn up(
        &self,
        engine: &dyn ChangelogEngine,
        tx: &MigrationTransaction<'_>,
    ) -> Result<MigrationOutcome, MigrationError> {
        let unrun = engine.unrun_changesets()?;
        if unrun.is_empty() {
            log::info!("Pending changesets were applied by another process while waiting");
            return Ok(MigrationOutcome::UpToDate);
        }
        log::info!("Applying {} changeset(s)", unrun.len());

        let count = self.update_policy.run(|attempt| {
            tx.nested(|| engine.update()).map_err(|err| {
                log::warn!("Changeset batch attempt {attempt} failed: {err}");
                err
            })
        })?;

        #[cfg(feature = "metrics")]
        METRICS.record_changesets_applied(count as u64);
        log::info!("Applied {count} changeset(s)");
        Ok(MigrationOutcome::Applied { count })
    }
}

/// Apply unrun changesets statement by statement, each in its own savepoint
fn force(
    engine: &dyn ChangelogEngine,
    tx: &MigrationTransaction<'_>,
) -> Result<MigrationOutcome, MigrationError> {
    engine.clear_checksums()?;
    let unrun = engine.unrun_changesets()?;
    let mut failed_statements = 0;

    for changeset in &unrun {
        for sql in changeset.up_sql(engine.engine()) {
            if let Err(err) = tx.nested(|| engine.execute_statement(changeset, &sql)) {
                failed_statements += 1;
                #[cfg(feature = "metrics")]
                METRICS.record_statement_failure();
                log::warn!("Forced migration skipped a failing statement: {err}");
            }
        }
        engine.mark_ran(changeset)?;
    }

    if !unrun.is_empty() {
        log::info!(
            "Forced {} changeset(s), {failed_statements} statement(s) failed",
            unrun.len()
        );
    }
    Ok(MigrationOutcome::Forced {
        applied: unrun.len(),
        failed_statements,
    })
}

fn rollback_quietly(tx: MigrationTransaction<'_>) {
    if let Err(e) = tx.rollback() {
        log::warn!("Failed to roll back migration transaction: {e}");
    }
}

impl SchemaMigrator for MigrationDriver {
    fn migrate(
        &self,
        details: &ConnectionDetails,
        direction: Direction,
    ) -> Result<MigrationOutcome, MigrationError> {
        MigrationDriver::migrate(self, details, direction)
    }
}
