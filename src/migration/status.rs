//! Migration status reporting

use crate::engine::{AppliedChangeSet, LockRecord};

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Applied changesets (from the database), in execution order
    pub applied: Vec<AppliedChangeSet>,

    /// Unrun changeset ids (from the changelog), in apply order
    pub pending: Vec<String>,

    /// Locks held at the time of the check
    pub locks: Vec<LockRecord>,
}

impl MigrationStatus {
    #[must_use]
    pub fn new(applied: Vec<AppliedChangeSet>, pending: Vec<String>, locks: Vec<LockRecord>) -> Self {
        Self {
            applied,
            pending,
            locks,
        }
    }

    /// Check if every changeset is applied
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        !self.locks.is_empty()
    }

    /// The most recently applied changeset
    #[must_use]
    pub fn last_applied(&self) -> Option<&AppliedChangeSet> {
        self.applied.iter().max_by_key(|record| record.order_executed)
    }

    /// The next changeset an update would apply
    #[must_use]
    pub fn next_pending(&self) -> Option<&str> {
        self.pending.first().map(String::as_str)
    }
}
