//! Changelog engine adapter
//!
//! A [`ChangelogEngine`] binds a [`Changelog`] to a live connection. It answers which
//! changesets are unrun, which locks are held and what SQL an update would run, and
//! performs updates, single-step rollbacks and lock clearing.
//!
//! Bookkeeping lives in two tables of the migrated database:
//! - `drydock_changelog`: one row per applied changeset (`id`, `author`, `filename`,
//!   `dateexecuted`, `orderexecuted`, `checksum`, `description`)
//! - `drydock_changelog_lock`: a single advisory lock row (`id`, `locked`,
//!   `lockgranted`, `lockedby`)
//!
//! Both are created on first use.
//!
//! The lock row only means something to other connections once it is committed, so
//! [`ChangelogEngine::acquire_lock`] and [`ChangelogEngine::release_lock`] are meant
//! to run outside the migration transaction.

use crate::changelog::{ChangeSet, Changelog};
use crate::connection::Engine;
use crate::executor::{DockError, DockExecutor};
use chrono::Utc;
use once_cell::sync::Lazy;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt::Write as _;

mod record;
pub(crate) mod statements;

pub use record::{AppliedChangeSet, LockRecord};
pub use statements::{CHANGELOG_TABLE, LOCK_TABLE};

use record::format_timestamp;
use statements::RanChangeSet;

/// Identity written to `lockedby`: `<host>:<process uuid>`
static LOCK_HOLDER: Lazy<String> = Lazy::new(|| {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "drydock".to_string());
    format!("{host}:{}", uuid::Uuid::new_v4())
});

/// Lock holder identity of this process
pub fn lock_holder_id() -> &'static str {
    &LOCK_HOLDER
}

/// Migration engine error
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] DockError),
    #[error("Changeset '{changeset}' failed: {source}\n  Statement: {sql}")]
    Statement {
        changeset: String,
        sql: String,
        #[source]
        source: DockError,
    },
    #[error("Migration lock is held by {holder}")]
    LockHeld { holder: String },
    #[error(
        "Changeset '{id}' was modified after it was applied (stored checksum {stored}, current {current}). \
         Revert the edit or run a forced migration to accept it."
    )]
    ChecksumMismatch {
        id: String,
        stored: String,
        current: String,
    },
    #[error("Changeset '{0}' has no rollback statements")]
    NoRollback(String),
    #[error("Changeset '{0}' is recorded as applied but is not in the changelog")]
    UnknownChangeSet(String),
}

/// SQL an update would run, without running it
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PendingSql {
    /// Ids of the unrun changesets, in apply order
    pub changesets: Vec<String>,
    pub sql: String,
}

/// Engine handle bound to one connection and one changelog
pub trait ChangelogEngine {
    fn engine(&self) -> Engine;

    fn changelog(&self) -> &Changelog;

    /// Whether `drydock_changelog` exists
    fn bookkeeping_exists(&self) -> Result<bool, EngineError>;

    /// Bookkeeping rows in execution order
    fn applied_changesets(&self) -> Result<Vec<AppliedChangeSet>, EngineError>;

    /// Changesets not yet recorded as applied, in changelog order
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ChecksumMismatch` if an applied changeset was edited.
    fn unrun_changesets(&self) -> Result<Vec<ChangeSet>, EngineError>;

    /// Currently held locks
    fn list_locks(&self) -> Result<Vec<LockRecord>, EngineError>;

    fn pending_sql(&self) -> Result<PendingSql, EngineError>;

    /// Apply every unrun changeset in order while holding the lock row
    ///
    /// Takes and releases the lock row itself unless it is already held through
    /// [`acquire_lock`](Self::acquire_lock).
    ///
    /// # Returns
    ///
    /// The number of changesets applied.
    fn update(&self) -> Result<usize, EngineError>;

    /// Roll back the most recently applied changeset with its `down` statements
    ///
    /// # Returns
    ///
    /// The id rolled back, or `None` when nothing has been applied.
    fn rollback_one(&self) -> Result<Option<String>, EngineError>;

    /// Take the lock row for this engine's holder
    ///
    /// # Errors
    ///
    /// Returns `EngineError::LockHeld` if another holder has it.
    fn acquire_lock(&self) -> Result<(), EngineError>;

    /// Release the lock row taken by [`acquire_lock`](Self::acquire_lock)
    fn release_lock(&self) -> Result<(), EngineError>;

    /// Clear every lock row
    fn force_release_locks(&self) -> Result<(), EngineError>;

    /// Null every stored checksum so the next listing backfills them
    fn clear_checksums(&self) -> Result<(), EngineError>;

    /// Execute one statement of `changeset`
    fn execute_statement(&self, changeset: &ChangeSet, sql: &str) -> Result<(), EngineError>;

    /// Record `changeset` as applied
    fn mark_ran(&self, changeset: &ChangeSet) -> Result<(), EngineError>;

    /// Rewrite every bookkeeping row's filename
    ///
    /// # Returns
    ///
    /// The number of rows touched.
    fn consolidate_filenames(&self, filename: &str) -> Result<u64, EngineError>;
}

/// [`ChangelogEngine`] over a [`DockExecutor`]
pub struct SqlChangelogEngine<'a> {
    executor: &'a dyn DockExecutor,
    changelog: &'a Changelog,
    holder: String,
    tables_ready: Cell<bool>,
    lock_held: Cell<bool>,
}

impl<'a> SqlChangelogEngine<'a> {
    pub fn new(executor: &'a dyn DockExecutor, changelog: &'a Changelog) -> Self {
        Self::with_holder(executor, changelog, lock_holder_id())
    }

    /// Use an explicit lock holder identity
    pub fn with_holder(executor: &'a dyn DockExecutor, changelog: &'a Changelog, holder: &str) -> Self {
        Self {
            executor,
            changelog,
            holder: holder.to_string(),
            tables_ready: Cell::new(false),
            lock_held: Cell::new(false),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    fn engine_kind(&self) -> Engine {
        self.executor.engine()
    }

    fn table_exists(&self, table: &str) -> Result<bool, EngineError> {
        let sql = statements::table_exists(self.engine_kind(), table);
        Ok(self.executor.query_one(&sql)?.get_i64(0)? > 0)
    }

    /// Create bookkeeping and lock tables and seed the lock row
    fn ensure_tables(&self) -> Result<(), EngineError> {
        if self.tables_ready.get() {
            return Ok(());
        }
        let engine = self.engine_kind();
        self.executor.execute(&statements::create_changelog_table(engine))?;
        self.executor.execute(&statements::create_lock_table(engine))?;
        let rows = self
            .executor
            .query_one(&statements::count_lock_rows(engine))?
            .get_i64(0)?;
        if rows == 0 {
            self.executor.execute(&statements::seed_lock_row(engine))?;
        }
        self.tables_ready.set(true);
        Ok(())
    }

    fn next_order(&self) -> Result<i64, EngineError> {
        let sql = statements::select_max_order(self.engine_kind());
        Ok(self.executor.query_one(&sql)?.get_i64(0)? + 1)
    }

    fn verify_checksum(&self, changeset: &ChangeSet, record: &AppliedChangeSet) -> Result<(), EngineError> {
        let current = changeset.checksum();
        match &record.checksum {
            Some(stored) if *stored == current => Ok(()),
            Some(stored) => Err(EngineError::ChecksumMismatch {
                id: changeset.id.clone(),
                stored: stored.clone(),
                current,
            }),
            None => {
                log::debug!("Backfilling checksum for changeset '{}'", changeset.id);
                let sql = statements::update_checksum(
                    self.engine_kind(),
                    &record.id,
                    &record.filename,
                    &current,
                );
                self.executor.execute(&sql)?;
                Ok(())
            }
        }
    }

    /// Whether this engine currently holds the lock row
    pub fn holds_lock(&self) -> bool {
        self.lock_held.get()
    }

    fn take_lock_row(&self) -> Result<(), EngineError> {
        self.ensure_tables()?;
        let sql = statements::acquire_lock(
            self.engine_kind(),
            &format_timestamp(Utc::now()),
            &self.holder,
        );
        if self.executor.execute(&sql)? == 0 {
            let holder = self
                .list_locks()?
                .first()
                .map(LockRecord::describe)
                .unwrap_or_else(|| "another process".to_string());
            return Err(EngineError::LockHeld { holder });
        }
        self.lock_held.set(true);
        log::debug!("Acquired migration lock as {}", self.holder);
        Ok(())
    }

    fn clear_lock_row(&self) -> Result<(), EngineError> {
        self.executor
            .execute(&statements::release_lock(self.engine_kind()))?;
        self.lock_held.set(false);
        log::debug!("Released migration lock held by {}", self.holder);
        Ok(())
    }

    /// Run `f` while holding the lock row
    ///
    /// A lock taken here is released whatever `f` returns; a lock already held is left
    /// for its owner to release.
    fn with_lock<T>(&self, f: impl FnOnce() -> Result<T, EngineError>) -> Result<T, EngineError> {
        if self.lock_held.get() {
            return f();
        }
        self.take_lock_row()?;
        let result = f();
        match (self.clear_lock_row(), result) {
            (Ok(()), result) => result,
            (Err(release_err), Ok(_)) => Err(release_err),
            (Err(release_err), Err(err)) => {
                log::warn!("Failed to release migration lock after error: {release_err}");
                Err(err)
            }
        }
    }

    fn apply_changeset(&self, changeset: &ChangeSet) -> Result<(), EngineError> {
        for sql in changeset.up_sql(self.engine_kind()) {
            self.execute_statement(changeset, &sql)?;
        }
        self.mark_ran(changeset)?;
        log::info!("Applied changeset {}::{}", self.changelog.filename(), changeset.id);
        Ok(())
    }
}

impl ChangelogEngine for SqlChangelogEngine<'_> {
    fn engine(&self) -> Engine {
        self.engine_kind()
    }

    fn changelog(&self) -> &Changelog {
        self.changelog
    }

    fn bookkeeping_exists(&self) -> Result<bool, EngineError> {
        self.table_exists(CHANGELOG_TABLE)
    }

    fn applied_changesets(&self) -> Result<Vec<AppliedChangeSet>, EngineError> {
        self.ensure_tables()?;
        let rows = self
            .executor
            .query_all(&statements::select_applied(self.engine_kind()))?;
        rows.iter()
            .map(|row| AppliedChangeSet::from_row(row).map_err(EngineError::from))
            .collect()
    }

    fn unrun_changesets(&self) -> Result<Vec<ChangeSet>, EngineError> {
        let applied = self.applied_changesets()?;
        let by_id: HashMap<&str, &AppliedChangeSet> = applied
            .iter()
            .filter(|record| record.filename == self.changelog.filename())
            .map(|record| (record.id.as_str(), record))
            .collect();

        let mut unrun = Vec::new();
        for changeset in self.changelog.changesets() {
            match by_id.get(changeset.id.as_str()) {
                Some(record) => self.verify_checksum(changeset, record)?,
                None => unrun.push(changeset.clone()),
            }
        }
        Ok(unrun)
    }

    fn list_locks(&self) -> Result<Vec<LockRecord>, EngineError> {
        if !self.tables_ready.get() && !self.table_exists(LOCK_TABLE)? {
            return Ok(Vec::new());
        }
        let rows = self
            .executor
            .query_all(&statements::select_held_locks(self.engine_kind()))?;
        rows.iter()
            .map(|row| LockRecord::from_row(row).map_err(EngineError::from))
            .collect()
    }

    fn pending_sql(&self) -> Result<PendingSql, EngineError> {
        let unrun = self.unrun_changesets()?;
        let engine = self.engine_kind();
        let filename = self.changelog.filename();
        let mut order = self.next_order()?;
        let mut out = String::new();

        for changeset in &unrun {
            let _ = writeln!(
                out,
                "-- Changeset {filename}::{}::{}",
                changeset.id, changeset.author
            );
            if let Some(description) = changeset.description() {
                let _ = writeln!(out, "-- {description}");
            }
            for sql in changeset.up_sql(engine) {
                let _ = writeln!(out, "{sql};");
            }
            let record = statements::insert_ran(
                engine,
                &RanChangeSet {
                    id: &changeset.id,
                    author: &changeset.author,
                    filename,
                    date_executed: &format_timestamp(Utc::now()),
                    order_executed: order,
                    checksum: &changeset.checksum(),
                    description: changeset.description(),
                },
            );
            let _ = writeln!(out, "{record};\n");
            order += 1;
        }

        Ok(PendingSql {
            changesets: unrun.into_iter().map(|cs| cs.id).collect(),
            sql: out,
        })
    }

    fn update(&self) -> Result<usize, EngineError> {
        let unrun = self.unrun_changesets()?;
        if unrun.is_empty() {
            return Ok(0);
        }
        self.with_lock(|| {
            for changeset in &unrun {
                self.apply_changeset(changeset)?;
            }
            Ok(unrun.len())
        })
    }

    fn rollback_one(&self) -> Result<Option<String>, EngineError> {
        let applied = self.applied_changesets()?;
        let Some(last) = applied.last() else {
            log::info!("No applied changesets to roll back");
            return Ok(None);
        };
        let changeset = self
            .changelog
            .get(&last.id)
            .ok_or_else(|| EngineError::UnknownChangeSet(last.id.clone()))?;
        let down = changeset.down_sql(self.engine_kind());
        if down.is_empty() {
            return Err(EngineError::NoRollback(changeset.id.clone()));
        }

        self.with_lock(|| {
            for sql in &down {
                self.execute_statement(changeset, sql)?;
            }
            let sql = statements::delete_ran(self.engine_kind(), &last.id, &last.filename);
            self.executor.execute(&sql)?;
            Ok(())
        })?;
        log::info!("Rolled back changeset {}::{}", last.filename, last.id);
        Ok(Some(last.id.clone()))
    }

    fn acquire_lock(&self) -> Result<(), EngineError> {
        self.take_lock_row()
    }

    fn release_lock(&self) -> Result<(), EngineError> {
        self.clear_lock_row()
    }

    fn force_release_locks(&self) -> Result<(), EngineError> {
        if !self.table_exists(LOCK_TABLE)? {
            return Ok(());
        }
        let cleared = self
            .executor
            .execute(&statements::force_release_locks(self.engine_kind()))?;
        self.lock_held.set(false);
        log::info!("Released migration locks ({cleared} row(s) reset)");
        Ok(())
    }

    fn clear_checksums(&self) -> Result<(), EngineError> {
        if !self.bookkeeping_exists()? {
            return Ok(());
        }
        self.executor
            .execute(&statements::clear_checksums(self.engine_kind()))?;
        Ok(())
    }

    fn execute_statement(&self, changeset: &ChangeSet, sql: &str) -> Result<(), EngineError> {
        self.executor
            .execute(sql)
            .map(|_| ())
            .map_err(|source| EngineError::Statement {
                changeset: changeset.id.clone(),
                sql: sql.to_string(),
                source,
            })
    }

    fn mark_ran(&self, changeset: &ChangeSet) -> Result<(), EngineError> {
        self.ensure_tables()?;
        let sql = statements::insert_ran(
            self.engine_kind(),
            &RanChangeSet {
                id: &changeset.id,
                author: &changeset.author,
                filename: self.changelog.filename(),
                date_executed: &format_timestamp(Utc::now()),
                order_executed: self.next_order()?,
                checksum: &changeset.checksum(),
                description: changeset.description(),
            },
        );
        self.executor.execute(&sql)?;
        Ok(())
    }

    fn consolidate_filenames(&self, filename: &str) -> Result<u64, EngineError> {
        let sql = statements::set_filenames(self.engine_kind(), filename);
        Ok(self.executor.execute(&sql)?)
    }
}
