use serde::Deserialize;
use std::time::Duration;

use super::PoolError;

/// Size and acquire timeout of the application connection pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_pool_timeout_seconds")]
    pub pool_timeout_seconds: u64,
}

fn default_max_connections() -> usize {
    10
}

fn default_pool_timeout_seconds() -> u64 {
    30 // Default timeout of 30 seconds
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            pool_timeout_seconds: default_pool_timeout_seconds(),
        }
    }
}

impl PoolConfig {
    pub fn new(max_connections: usize, pool_timeout_seconds: u64) -> Self {
        Self {
            max_connections,
            pool_timeout_seconds,
        }
    }

    /// How long `acquire` waits for a connection to be returned
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
