//! Configuration Module
//!
//! Loads drydock settings from an optional `config/drydock.{toml,yaml,json}` file,
//! then from `DRYDOCK__<SECTION>__<KEY>` environment variables, which win.
//! A file that fails to parse is logged and skipped.

use crate::connection::{ConnectionDetails, ConnectionFields, ConnectivityError, Engine};
use crate::pool::PoolConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "config/drydock";
const ENV_PREFIX: &str = "DRYDOCK";

/// Top-level configuration: `[database]`, `[migration]` and `[pool]` sections
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DrydockConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Where the database is
///
/// `connection_uri` wins over the discrete fields when both are set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default, alias = "type")]
    pub db_type: Option<Engine>,
    #[serde(default, alias = "url")]
    pub connection_uri: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub dbname: Option<String>,
    /// Database file of the embedded engine
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn fields(&self) -> ConnectionFields {
        ConnectionFields {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            dbname: self.dbname.clone(),
            file: self.file.clone(),
        }
    }

    /// Resolve the configured connection; without a URI or engine the embedded
    /// engine is assumed
    pub fn connection_details(&self) -> Result<ConnectionDetails, ConnectivityError> {
        let uri = self.connection_uri.as_deref();
        let engine = match uri {
            Some(_) => self.db_type,
            None => Some(self.db_type.unwrap_or(Engine::Sqlite)),
        };
        ConnectionDetails::resolve(engine, uri, &self.fields())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    #[serde(default = "default_auto_migrate")]
    pub auto_migrate: bool,
    #[serde(default)]
    pub skip_data_migrations: bool,
    #[serde(default = "default_changelog")]
    pub changelog: PathBuf,
}

fn default_auto_migrate() -> bool {
    true
}

fn default_changelog() -> PathBuf {
    PathBuf::from("migrations/changelog.yaml")
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            auto_migrate: default_auto_migrate(),
            skip_data_migrations: false,
            changelog: default_changelog(),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX).separator("__")
}

impl DrydockConfig {
    /// Load from `config/drydock.{toml,yaml,json}` (optional), then `DRYDOCK__*` env vars
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load from `path` (or the default file), then `DRYDOCK__*` env vars
    ///
    /// A file that exists but cannot be read or parsed is skipped with a warning
    /// and only the environment is used.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(false),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = match Config::builder()
            .add_source(file)
            .add_source(environment())
            .build()
        {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("Failed to load config file, falling back to env: {err}");
                Config::builder()
                    .add_source(environment())
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                        ))
                    })?
            }
        };

        settings.try_deserialize::<DrydockConfig>().map_err(|e| {
            ConfigError::Message(format!(
                "Drydock configuration could not be loaded from file or environment: {e}"
            ))
        })
    }
}
