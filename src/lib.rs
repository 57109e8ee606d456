//! # Drydock
//!
//! Changelog-driven schema migrations for SQLite, PostgreSQL and MySQL.
//!
//! A [`Changelog`] lists changesets of SQL. The [`MigrationDriver`] applies the unrun
//! ones inside one transaction, guarded by an advisory lock row, and records each in
//! a bookkeeping table. The [`SetupOrchestrator`] sequences connectivity check,
//! migrations, pool creation and data migrations at application start-up.

pub mod changelog;
pub mod config;
pub mod connection;
pub mod engine;
pub mod executor;
pub mod metrics;
pub mod migration;
pub mod pool;
pub mod retry;
pub mod setup;
pub mod transaction;

pub use changelog::{ChangeSet, Changelog, ChangelogError, Statement};
pub use config::DrydockConfig;
pub use connection::{
    connect, ConnectionDetails, ConnectivityCheck, ConnectivityError, DriverConnectivityCheck,
    Engine, ProbeTarget, QuoteStyle,
};
pub use engine::{ChangelogEngine, EngineError, SqlChangelogEngine};
pub use executor::{DockError, DockExecutor, DockRow, DockValue};
pub use migration::{Direction, MigrationDriver, MigrationError, MigrationOutcome, SchemaMigrator};
pub use pool::{default_database, install_default, DatabaseHandle, DbPool, PoolConfig, PoolError};
pub use retry::RetryPolicy;
pub use setup::{
    BoxError, DataMigrations, NoDataMigrations, SetupError, SetupOptions, SetupOrchestrator,
    SetupState,
};
