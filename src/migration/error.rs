//! Migration-specific error types

use crate::connection::ConnectivityError;
use crate::engine::{EngineError, LOCK_TABLE};
use crate::executor::DockError;
use std::time::Duration;

/// Migration-specific errors
#[derive(Debug)]
pub enum MigrationError {
    /// Could not open the connection the run needs
    Connectivity(ConnectivityError),
    /// The lock row stayed held through every wait attempt
    LockTimeout {
        attempts: u32,
        delay: Duration,
        /// Holder descriptions at the final check
        holders: Vec<String>,
    },
    /// Engine-level failure (the underlying cause is carried along)
    Engine(EngineError),
    /// BEGIN / COMMIT / ROLLBACK failed
    Transaction(DockError),
}

impl MigrationError {
    /// Lock failures are returned without rolling back and force-clearing the lock
    pub fn is_lock_failure(&self) -> bool {
        matches!(
            self,
            MigrationError::LockTimeout { .. } | MigrationError::Engine(EngineError::LockHeld { .. })
        )
    }
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationError::Connectivity(e) => write!(f, "{e}"),
            MigrationError::LockTimeout {
                attempts,
                delay,
                holders,
            } => {
                let held_by = if holders.is_empty() {
                    "unknown holder".to_string()
                } else {
                    holders.join(", ")
                };
                write!(
                    f,
                    "Migration lock timeout: the database is still locked after {attempts} checks \
                     ({} s apart), held by {held_by}.\n\
                     Another process may be running migrations. If none is, the lock is stale; clear it with\n\
                     \x20 drydock-migrate release-locks\n\
                     or run this SQL against the database:\n\
                     \x20 UPDATE {LOCK_TABLE} SET locked = FALSE, lockgranted = NULL, lockedby = NULL;",
                    delay.as_secs_f64()
                )
            }
            MigrationError::Engine(e) => write!(f, "Migration engine error: {e}"),
            MigrationError::Transaction(e) => write!(f, "Migration transaction error: {e}"),
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MigrationError::Connectivity(e) => Some(e),
            MigrationError::Engine(e) => Some(e),
            MigrationError::Transaction(e) => Some(e),
            MigrationError::LockTimeout { .. } => None,
        }
    }
}

impl From<EngineError> for MigrationError {
    fn from(err: EngineError) -> Self {
        MigrationError::Engine(err)
    }
}

impl From<ConnectivityError> for MigrationError {
    fn from(err: ConnectivityError) -> Self {
        MigrationError::Connectivity(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_explains_remediation() {
        let err = MigrationError::LockTimeout {
            attempts: 5,
            delay: Duration::from_secs(2),
            holders: vec!["web-1:abc".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("after 5 checks (2 s apart)"), "{message}");
        assert!(message.contains("web-1:abc"));
        assert!(message.contains("drydock-migrate release-locks"));
        assert!(message.contains("UPDATE drydock_changelog_lock SET locked = FALSE"));
    }

    #[test]
    fn test_lock_failure_classification() {
        let timeout = MigrationError::LockTimeout {
            attempts: 1,
            delay: Duration::ZERO,
            holders: Vec::new(),
        };
        assert!(timeout.is_lock_failure());

        let held = MigrationError::from(EngineError::LockHeld {
            holder: "x".to_string(),
        });
        assert!(held.is_lock_failure());

        let other = MigrationError::from(EngineError::NoRollback("a".to_string()));
        assert!(!other.is_lock_failure());
        assert!(other.to_string().starts_with("Migration engine error:"));
    }
}
