//! Connectivity probe run before setup touches the schema

use super::{connect, ConnectionDetails, ConnectivityError};
use crate::executor::{DockExecutor, SqliteExecutor};

/// What a connectivity probe is allowed to assume about the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeTarget {
    /// The application's own database: an embedded file may be created on first connect
    ApplicationDatabase,
    /// A database that must already exist; embedded files are never created
    ExistingDatabase,
}

/// Answers "can we reach this database?"
pub trait ConnectivityCheck: Send + Sync {
    /// Probe `details`
    ///
    /// With `throw_on_failure` the failure cause is returned as an error; otherwise
    /// failures are logged and reported as `Ok(false)`.
    fn can_connect(
        &self,
        details: &ConnectionDetails,
        target: ProbeTarget,
        throw_on_failure: bool,
    ) -> Result<bool, ConnectivityError>;
}

/// Probe that opens a real driver connection and runs `SELECT 1`
#[derive(Debug, Default, Clone, Copy)]
pub struct DriverConnectivityCheck;

impl DriverConnectivityCheck {
    fn probe(details: &ConnectionDetails, target: ProbeTarget) -> Result<(), ConnectivityError> {
        let executor: Box<dyn DockExecutor + Send> = match (details, target) {
            (ConnectionDetails::Sqlite { path }, ProbeTarget::ExistingDatabase) => {
                if !path.exists() {
                    return Err(ConnectivityError::DatabaseMissing(path.clone()));
                }
                let executor = SqliteExecutor::open_existing(path).map_err(|source| {
                    ConnectivityError::Driver {
                        target: details.to_string(),
                        source,
                    }
                })?;
                Box::new(executor)
            }
            _ => connect(details)?,
        };
        executor
            .query_one("SELECT 1")
            .map_err(|source| ConnectivityError::Driver {
                target: details.to_string(),
                source,
            })?;
        Ok(())
    }
}

impl ConnectivityCheck for DriverConnectivityCheck {
    fn can_connect(
        &self,
        details: &ConnectionDetails,
        target: ProbeTarget,
        throw_on_failure: bool,
    ) -> Result<bool, ConnectivityError> {
        match Self::probe(details, target) {
            Ok(()) => Ok(true),
            Err(e) if throw_on_failure => Err(e),
            Err(e) => {
                log::debug!("Connectivity probe for {details} failed: {e}");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_database_may_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let details = ConnectionDetails::Sqlite {
            path: dir.path().join("fresh.db"),
        };
        let ok = DriverConnectivityCheck
            .can_connect(&details, ProbeTarget::ApplicationDatabase, true)
            .unwrap();
        assert!(ok);
    }

    #[test]
    fn test_existing_database_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let details = ConnectionDetails::Sqlite {
            path: dir.path().join("absent.db"),
        };
        let quiet = DriverConnectivityCheck
            .can_connect(&details, ProbeTarget::ExistingDatabase, false)
            .unwrap();
        assert!(!quiet);
        assert!(!dir.path().join("absent.db").exists());

        let err = DriverConnectivityCheck
            .can_connect(&details, ProbeTarget::ExistingDatabase, true)
            .unwrap_err();
        assert!(matches!(err, ConnectivityError::DatabaseMissing(_)));
    }

    #[test]
    fn test_unreachable_network_database() {
        let details = ConnectionDetails::from_uri("postgres://nobody@127.0.0.1:1/none").unwrap();
        let ok = DriverConnectivityCheck
            .can_connect(&details, ProbeTarget::ApplicationDatabase, false)
            .unwrap();
        assert!(!ok);
    }
}
