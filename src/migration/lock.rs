//! Advisory migration lock coordination
//!
//! The lock is a row in `drydock_changelog_lock`, taken and released with committed
//! statements so every connection sees who holds it. It is best-effort: two processes
//! can both observe it clear, and the slower one then fails to take it. The
//! coordinator waits for a held lock to clear and force-clears it on request.

use crate::engine::ChangelogEngine;
use crate::migration::MigrationError;
use crate::retry::{RetryPolicy, LOCK_WAIT};
use std::cell::Cell;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Last observed lock state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unknown,
    Checking,
    Locked,
    Clear,
}

enum Wait {
    Locked,
    Failed(MigrationError),
}

/// Detects, waits for and force-clears the migration lock
pub struct LockCoordinator<'a> {
    engine: &'a dyn ChangelogEngine,
    policy: RetryPolicy,
    state: Cell<LockState>,
    checks: Cell<u32>,
}

impl<'a> LockCoordinator<'a> {
    /// Coordinator with the default wait policy (5 checks, 2 s apart)
    pub fn new(engine: &'a dyn ChangelogEngine) -> Self {
        Self::with_policy(engine, LOCK_WAIT)
    }

    pub fn with_policy(engine: &'a dyn ChangelogEngine, policy: RetryPolicy) -> Self {
        Self {
            engine,
            policy,
            state: Cell::new(LockState::Unknown),
            checks: Cell::new(0),
        }
    }

    pub fn state(&self) -> LockState {
        self.state.get()
    }

    /// Number of lock checks made so far
    pub fn checks(&self) -> u32 {
        self.checks.get()
    }

    /// Query the lock table for an active lock
    pub fn has_lock(&self) -> Result<bool, MigrationError> {
        self.state.set(LockState::Checking);
        self.checks.set(self.checks.get() + 1);
        #[cfg(feature = "metrics")]
        METRICS.record_lock_check();

        match self.engine.list_locks() {
            Ok(locks) => {
                let locked = !locks.is_empty();
                self.state.set(if locked {
                    LockState::Locked
                } else {
                    LockState::Clear
                });
                Ok(locked)
            }
            Err(e) => {
                self.state.set(LockState::Unknown);
                Err(e.into())
            }
        }
    }

    /// Wait for the lock to clear
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LockTimeout` if the lock is still held after every
    /// attempt of the policy. Nothing is cleaned up.
    pub fn wait_for_clear(&self) -> Result<(), MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::lock_wait_span().entered();

        let attempts = self.policy.attempts.max(1);
        let outcome = self.policy.run_if(
            |attempt| match self.has_lock() {
                Ok(false) => Ok(()),
                Ok(true) => {
                    log::info!(
                        "Database has migration lock; waiting for it to clear (check {attempt}/{attempts})"
                    );
                    Err(Wait::Locked)
                }
                Err(e) => Err(Wait::Failed(e)),
            },
            |wait| matches!(wait, Wait::Locked),
        );

        match outcome {
            Ok(()) => Ok(()),
            Err(Wait::Failed(e)) => Err(e),
            Err(Wait::Locked) => {
                let holders = self
                    .engine
                    .list_locks()
                    .map(|locks| locks.iter().map(|l| l.describe()).collect())
                    .unwrap_or_default();
                Err(MigrationError::LockTimeout {
                    attempts,
                    delay: self.policy.delay,
                    holders,
                })
            }
        }
    }

    /// Clear every lock row; failures are logged, never returned
    pub fn force_clear(&self) {
        match self.engine.force_release_locks() {
            Ok(()) => self.state.set(LockState::Clear),
            Err(e) => log::warn!("Failed to force-release migration locks: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::{ChangeSet, Changelog};
    use crate::connection::Engine;
    use crate::engine::{AppliedChangeSet, EngineError, LockRecord, PendingSql};
    use crate::executor::DockError;
    use std::time::{Duration, Instant};

    /// Engine double whose lock clears after a set number of checks
    struct ScriptedLocks {
        changelog: Changelog,
        locked_for: u32,
        calls: Cell<u32>,
        fail_release: bool,
        released: Cell<bool>,
    }

    impl ScriptedLocks {
        fn new(locked_for: u32) -> Self {
            Self {
                changelog: Changelog::new("test", Vec::new()).unwrap(),
                locked_for,
                calls: Cell::new(0),
                fail_release: false,
                released: Cell::new(false),
            }
        }
    }

    impl ChangelogEngine for ScriptedLocks {
        fn engine(&self) -> Engine {
            Engine::Sqlite
        }
        fn changelog(&self) -> &Changelog {
            &self.changelog
        }
        fn bookkeeping_exists(&self) -> Result<bool, EngineError> {
            Ok(true)
        }
        fn applied_changesets(&self) -> Result<Vec<AppliedChangeSet>, EngineError> {
            Ok(Vec::new())
        }
        fn unrun_changesets(&self) -> Result<Vec<ChangeSet>, EngineError> {
            Ok(Vec::new())
        }
        fn list_locks(&self) -> Result<Vec<LockRecord>, EngineError> {
            let call = self.calls.get() + 1;
            self.calls.set(call);
            if call <= self.locked_for {
                Ok(vec![LockRecord {
                    id: 1,
                    granted: None,
                    locked_by: Some("peer:1".to_string()),
                }])
            } else {
                Ok(Vec::new())
            }
        }
        fn pending_sql(&self) -> Result<PendingSql, EngineError> {
            Ok(PendingSql::default())
        }
        fn update(&self) -> Result<usize, EngineError> {
            Ok(0)
        }
        fn rollback_one(&self) -> Result<Option<String>, EngineError> {
            Ok(None)
        }
        fn acquire_lock(&self) -> Result<(), EngineError> {
            Ok(())
        }
        fn release_lock(&self) -> Result<(), EngineError> {
            Ok(())
        }
        fn force_release_locks(&self) -> Result<(), EngineError> {
            if self.fail_release {
                return Err(EngineError::Database(DockError::Other("connection lost".to_string())));
            }
            self.released.set(true);
            Ok(())
        }
        fn clear_checksums(&self) -> Result<(), EngineError> {
            Ok(())
        }
        fn execute_statement(&self, _: &ChangeSet, _: &str) -> Result<(), EngineError> {
            Ok(())
        }
        fn mark_ran(&self, _: &ChangeSet) -> Result<(), EngineError> {
            Ok(())
        }
        fn consolidate_filenames(&self, _: &str) -> Result<u64, EngineError> {
            Ok(0)
        }
    }

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(5))
    }

    #[test]
    fn test_state_transitions() {
        let engine = ScriptedLocks::new(1);
        let lock = LockCoordinator::new(&engine);
        assert_eq!(lock.state(), LockState::Unknown);
        assert!(lock.has_lock().unwrap());
        assert_eq!(lock.state(), LockState::Locked);
        assert!(!lock.has_lock().unwrap());
        assert_eq!(lock.state(), LockState::Clear);
        assert_eq!(lock.checks(), 2);
    }

    #[test]
    fn test_wait_succeeds_when_lock_clears() {
        let engine = ScriptedLocks::new(3);
        let lock = LockCoordinator::with_policy(&engine, fast(5));
        lock.wait_for_clear().unwrap();
        assert_eq!(lock.checks(), 4);
        assert_eq!(lock.state(), LockState::Clear);
    }

    #[test]
    fn test_wait_times_out_after_exactly_five_checks() {
        let engine = ScriptedLocks::new(u32::MAX);
        let lock = LockCoordinator::with_policy(&engine, fast(5));
        let start = Instant::now();
        let err = lock.wait_for_clear().unwrap_err();
        assert_eq!(lock.checks(), 5);
        assert!(start.elapsed() >= Duration::from_millis(20));
        match err {
            MigrationError::LockTimeout {
                attempts, holders, ..
            } => {
                assert_eq!(attempts, 5);
                assert_eq!(holders, vec!["peer:1".to_string()]);
            }
            other => panic!("expected LockTimeout, got {other:?}"),
        }
        assert!(!engine.released.get());
    }

    #[test]
    fn test_force_clear_swallows_errors() {
        let mut engine = ScriptedLocks::new(0);
        engine.fail_release = true;
        let lock = LockCoordinator::new(&engine);
        lock.force_clear();
        assert_eq!(lock.state(), LockState::Unknown);

        let engine = ScriptedLocks::new(0);
        let lock = LockCoordinator::new(&engine);
        lock.force_clear();
        assert!(engine.released.get());
        assert_eq!(lock.state(), LockState::Clear);
    }
}
