//! Setup orchestration
//!
//! Brings a database from "configured" to "ready for application queries":
//! connectivity check, schema migrations, pool creation, data migrations, then the
//! readiness latch. The sequence runs at most once per [`SetupState`]; later and
//! concurrent callers block on the first run and get its result.

use crate::changelog::{Changelog, ChangelogError};
use crate::config::DrydockConfig;
use crate::connection::{
    ConnectionDetails, ConnectivityCheck, ConnectivityError, DriverConnectivityCheck, ProbeTarget,
};
use crate::migration::{Direction, MigrationDriver, MigrationError, MigrationOutcome, SchemaMigrator};
use crate::pool::{install_default, DbPool, PoolConfig, PoolError};
use crate::retry::{RetryPolicy, SETUP_MIGRATE};
use once_cell::sync::{Lazy, OnceCell};
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("database is not reachable: {0}")]
    Connectivity(#[from] ConnectivityError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(
        "automatic migration is disabled and {} changeset(s) are pending; apply the logged SQL or enable auto_migrate",
        .changesets.len()
    )]
    ManualUpgradeRequired { changesets: Vec<String>, sql: String },
    #[error("failed to create connection pool: {0}")]
    Pool(#[from] PoolError),
    #[error("failed to load changelog: {0}")]
    Changelog(#[from] ChangelogError),
    #[error("data migration failed: {0}")]
    DataMigration(#[source] BoxError),
}

/// Application-level data migrations run after the schema is current
pub trait DataMigrations: Send + Sync {
    fn run_all(&self) -> Result<(), BoxError>;
}

/// No data migrations
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDataMigrations;

impl DataMigrations for NoDataMigrations {
    fn run_all(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<F> DataMigrations for F
where
    F: Fn() -> Result<(), BoxError> + Send + Sync,
{
    fn run_all(&self) -> Result<(), BoxError> {
        self()
    }
}

static GLOBAL_STATE: Lazy<Arc<SetupState>> = Lazy::new(|| Arc::new(SetupState::new()));

/// One-shot readiness latch
///
/// Holds the result of the first setup run. Readiness is true only once that run
/// succeeded.
#[derive(Debug, Default)]
pub struct SetupState {
    outcome: OnceCell<Result<(), Arc<SetupError>>>,
}

impl SetupState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide latch
    pub fn global() -> Arc<SetupState> {
        GLOBAL_STATE.clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.outcome.get(), Some(Ok(())))
    }

    /// The finished result, if setup has completed
    pub fn outcome(&self) -> Option<Result<(), Arc<SetupError>>> {
        self.outcome.get().cloned()
    }

    /// Block until setup has completed and return its result
    pub fn wait(&self) -> Result<(), Arc<SetupError>> {
        self.outcome.wait().clone()
    }

    /// Run `f` unless a run already completed; concurrent callers block on the first
    pub fn run_once<F>(&self, f: F) -> Result<(), Arc<SetupError>>
    where
        F: FnOnce() -> Result<(), SetupError>,
    {
        self.outcome.get_or_init(|| f().map_err(Arc::new)).clone()
    }
}

/// Knobs of a setup run
#[derive(Debug, Clone, Copy)]
pub struct SetupOptions {
    /// Apply unrun changesets; when off, pending changesets abort setup
    pub auto_migrate: bool,
    pub skip_data_migrations: bool,
    /// Retry policy around the schema migration (default: retried once)
    pub migrate_retry: RetryPolicy,
    pub pool: PoolConfig,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            auto_migrate: true,
            skip_data_migrations: false,
            migrate_retry: SETUP_MIGRATE,
            pool: PoolConfig::default(),
        }
    }
}

impl SetupOptions {
    pub fn from_config(config: &DrydockConfig) -> Self {
        Self {
            auto_migrate: config.migration.auto_migrate,
            skip_data_migrations: config.migration.skip_data_migrations,
            migrate_retry: SETUP_MIGRATE,
            pool: config.pool,
        }
    }
}

/// Runs the setup sequence against one database
pub struct SetupOrchestrator {
    details: ConnectionDetails,
    options: SetupOptions,
    migrator: Box<dyn SchemaMigrator>,
    connectivity: Box<dyn ConnectivityCheck>,
    data_migrations: Box<dyn DataMigrations>,
    state: Arc<SetupState>,
    pool: OnceCell<Arc<DbPool>>,
}

impl SetupOrchestrator {
    /// Orchestrator with default options, a driver connectivity probe, no data
    /// migrations and its own readiness latch
    pub fn new(details: ConnectionDetails, migrator: impl SchemaMigrator + 'static) -> Self {
        Self {
            details,
            options: SetupOptions::default(),
            migrator: Box::new(migrator),
            connectivity: Box::new(DriverConnectivityCheck),
            data_migrations: Box::new(NoDataMigrations),
            state: Arc::new(SetupState::new()),
            pool: OnceCell::new(),
        }
    }

    /// Orchestrator for a loaded configuration, bound to the process-wide latch
    pub fn from_config(config: &DrydockConfig) -> Result<Self, SetupError> {
        let details = config.database.connection_details()?;
        let changelog = Changelog::from_path(&config.migration.changelog)?;
        Ok(Self::new(details, MigrationDriver::new(changelog))
            .with_options(SetupOptions::from_config(config))
            .with_state(SetupState::global()))
    }

    #[must_use]
    pub fn with_options(mut self, options: SetupOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_connectivity_check(mut self, check: impl ConnectivityCheck + 'static) -> Self {
        self.connectivity = Box::new(check);
        self
    }

    #[must_use]
    pub fn with_data_migrations(mut self, migrations: impl DataMigrations + 'static) -> Self {
        self.data_migrations = Box::new(migrations);
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: Arc<SetupState>) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &Arc<SetupState> {
        &self.state
    }

    /// The pool created by setup, once it got that far
    pub fn pool(&self) -> Option<&Arc<DbPool>> {
        self.pool.get()
    }

    /// Run setup, or return the result of the run that already happened
    pub fn setup(&self) -> Result<(), Arc<SetupError>> {
        self.state.run_once(|| self.run_setup())
    }

    fn run_setup(&self) -> Result<(), SetupError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::setup_span().entered();

        let start = Instant::now();
        log::info!("Starting database setup for {}", self.details);

        if !self
            .connectivity
            .can_connect(&self.details, ProbeTarget::ApplicationDatabase, true)?
        {
            return Err(ConnectivityError::Unreachable(self.details.to_string()).into());
        }

        self.migrate_schema()?;

        let pool = Arc::new(DbPool::new(self.details.clone(), self.options.pool)?);
        install_default(pool.clone());
        if self.pool.set(pool).is_err() {
            log::warn!("Setup pool was already initialised");
        }

        if self.options.skip_data_migrations {
            log::info!("Skipping data migrations");
        } else {
            self.data_migrations
                .run_all()
                .map_err(SetupError::DataMigration)?;
        }

        log::info!("Database setup complete in {:?}", start.elapsed());
        Ok(())
    }

    fn migrate_schema(&self) -> Result<(), SetupError> {
        if !self.options.auto_migrate {
            return match self.migrator.migrate(&self.details, Direction::Print)? {
                MigrationOutcome::PendingSql { changesets, sql } if !changesets.is_empty() => {
                    log::error!(
                        "Automatic migration is disabled and {} changeset(s) are pending. \
                         Apply this SQL to upgrade the database:\n{sql}",
                        changesets.len()
                    );
                    Err(SetupError::ManualUpgradeRequired { changesets, sql })
                }
                _ => {
                    log::debug!("No pending changesets to apply");
                    Ok(())
                }
            };
        }

        let attempts = self.options.migrate_retry.attempts.max(1);
        let outcome = self.options.migrate_retry.run(|attempt| {
            self.migrator
                .migrate(&self.details, Direction::Up)
                .map_err(|e| {
                    if attempt < attempts {
                        log::warn!("Schema migration attempt {attempt} failed, retrying: {e}");
                    }
                    e
                })
        })?;

        match outcome {
            MigrationOutcome::Applied { count } => {
                log::info!("Applied {count} changeset(s) on startup");
            }
            _ => log::debug!("No pending changesets to apply"),
        }
        Ok(())
    }
}
