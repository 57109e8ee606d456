//! Transaction Module
//!
//! A migration run happens inside one explicit transaction that rolls back unless
//! the run is marked successful. Inner units of work (one batch attempt, one forced
//! statement) run in savepoints so a failure undoes only that unit.

use crate::connection::Engine;
use crate::executor::{DockError, DockExecutor};
use std::cell::Cell;

fn begin_statement(engine: Engine) -> &'static str {
    match engine {
        Engine::MySql => "START TRANSACTION",
        Engine::Sqlite | Engine::Postgres => "BEGIN",
    }
}

/// Transaction guard over a borrowed executor
///
/// Dropping the guard without calling [`finish`](Self::finish) rolls back.
///
/// # Examples
///
/// ```no_run
/// use drydock::executor::{DockError, DockExecutor, SqliteExecutor};
/// use drydock::transaction::MigrationTransaction;
///
/// # fn main() -> Result<(), DockError> {
/// let executor = SqliteExecutor::open_in_memory()?;
/// let mut tx = MigrationTransaction::begin(&executor)?;
/// tx.executor().execute("CREATE TABLE t (v INTEGER)")?;
/// tx.mark_success();
/// assert!(tx.finish()?);
/// # Ok(())
/// # }
/// ```
pub struct MigrationTransaction<'a> {
    executor: &'a dyn DockExecutor,
    depth: Cell<u32>,
    success: bool,
    closed: bool,
}

impl<'a> MigrationTransaction<'a> {
    /// Start a transaction, disabling auto-commit for the connection
    pub fn begin(executor: &'a dyn DockExecutor) -> Result<Self, DockError> {
        executor.execute(begin_statement(executor.engine()))?;
        Ok(Self {
            executor,
            depth: Cell::new(0),
            success: false,
            closed: false,
        })
    }

    /// Get the executor the transaction runs on
    pub fn executor(&self) -> &'a dyn DockExecutor {
        self.executor
    }

    /// Mark the transaction to commit on [`finish`](Self::finish)
    pub fn mark_success(&mut self) {
        self.success = true;
    }

    pub fn is_marked_success(&self) -> bool {
        self.success
    }

    /// Run `f` inside a savepoint
    ///
    /// On `Ok` the savepoint is released; on `Err` the work done by `f` is rolled back
    /// to the savepoint and the error is returned. The outer transaction stays usable
    /// either way.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or a `DockError` (converted into `E`) if the
    /// savepoint itself cannot be created or released. On engines without
    /// transactional DDL a failed release after a successful `f` is not an error.
    pub fn nested<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<DockError>,
    {
        let depth = self.depth.get() + 1;
        let name = format!("sp_{depth}");
        self.executor.execute(&format!("SAVEPOINT {name}"))?;
        self.depth.set(depth);
        let result = f();
        self.depth.set(depth - 1);

        match result {
            Ok(value) => match self.executor.execute(&format!("RELEASE SAVEPOINT {name}")) {
                Ok(_) => Ok(value),
                // DDL in `f` committed implicitly and took the savepoint with it
                Err(e) if !self.executor.engine().transactional_ddl() => {
                    log::debug!("Savepoint {name} was already closed by an implicit commit: {e}");
                    Ok(value)
                }
                Err(e) => Err(e.into()),
            },
            Err(err) => {
                match self.executor.execute(&format!("ROLLBACK TO SAVEPOINT {name}")) {
                    Ok(_) => {
                        if let Err(e) = self.executor.execute(&format!("RELEASE SAVEPOINT {name}")) {
                            log::warn!("Failed to release savepoint {name} after rollback: {e}");
                        }
                    }
                    Err(e) => log::warn!("Failed to roll back to savepoint {name}: {e}"),
                }
                Err(err)
            }
        }
    }

    /// Close the transaction: commit when marked successful, otherwise roll back
    ///
    /// # Returns
    ///
    /// `Ok(true)` if the transaction committed, `Ok(false)` if it rolled back.
    pub fn finish(mut self) -> Result<bool, DockError> {
        self.closed = true;
        if self.success {
            self.executor.execute("COMMIT")?;
            Ok(true)
        } else {
            self.executor.execute("ROLLBACK")?;
            Ok(false)
        }
    }

    /// Roll back regardless of the success mark
    pub fn rollback(mut self) -> Result<(), DockError> {
        self.closed = true;
        self.executor.execute("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for MigrationTransaction<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.executor.execute("ROLLBACK") {
                log::warn!("Failed to roll back abandoned transaction: {e}");
            }
        }
    }
}
