//! Application connection pool
//!
//! A bounded set of executors handed out through [`PooledConnection`] guards. Idle
//! connections sit in a crossbeam channel; connections are opened lazily up to
//! `max_connections`, after which `acquire` blocks for up to the configured timeout.
//! Dropping a guard puts its connection back.

pub mod config;
pub mod handle;

pub use config::PoolConfig;
pub use handle::{default_database, install_default, DatabaseHandle};

use crate::connection::{connect, ConnectionDetails, ConnectivityError, Engine};
use crate::executor::DockExecutor;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type PooledExecutor = Box<dyn DockExecutor + Send>;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("could not open pooled connection: {0}")]
    Connect(#[from] ConnectivityError),
    #[error("timed out after {0:?} waiting for a pooled connection")]
    Timeout(Duration),
    #[error("connection pool is closed")]
    Closed,
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Bounded pool of database executors for one connection target
pub struct DbPool {
    details: ConnectionDetails,
    config: PoolConfig,
    idle_tx: Sender<PooledExecutor>,
    idle_rx: Receiver<PooledExecutor>,
    created: AtomicUsize,
}

impl std::fmt::Debug for DbPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbPool")
            .field("details", &self.details.to_string())
            .field("config", &self.config)
            .field("size", &self.size())
            .field("idle", &self.idle())
            .finish()
    }
}

impl DbPool {
    /// Create a pool and open its first connection
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` for a zero-sized pool, or
    /// `PoolError::Connect` if the first connection cannot be opened.
    pub fn new(details: ConnectionDetails, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let (idle_tx, idle_rx) = bounded(config.max_connections);
        let pool = Self {
            details,
            config,
            idle_tx,
            idle_rx,
            created: AtomicUsize::new(0),
        };

        let first = pool.open()?;
        pool.release(first);
        log::info!(
            "Connection pool ready for {} (max {} connections)",
            pool.details,
            config.max_connections
        );
        Ok(pool)
    }

    pub fn engine(&self) -> Engine {
        self.details.engine()
    }

    pub fn details(&self) -> &ConnectionDetails {
        &self.details
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Connections opened so far
    pub fn size(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    /// Connections waiting to be acquired
    pub fn idle(&self) -> usize {
        self.idle_rx.len()
    }

    /// Take a connection, opening a new one while under `max_connections`
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Timeout` if every connection stays checked out for the
    /// acquire timeout, or `PoolError::Connect` if a new connection fails to open.
    pub fn acquire(&self) -> Result<PooledConnection<'_>, PoolError> {
        if let Ok(conn) = self.idle_rx.try_recv() {
            return Ok(PooledConnection::new(self, conn));
        }

        let mut current = self.created.load(Ordering::Acquire);
        while current < self.config.max_connections {
            match self.created.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let conn = connect(&self.details).map_err(|e| {
                        self.created.fetch_sub(1, Ordering::AcqRel);
                        PoolError::Connect(e)
                    })?;
                    return Ok(PooledConnection::new(self, conn));
                }
                Err(actual) => current = actual,
            }
        }

        let timeout = self.config.acquire_timeout();
        match self.idle_rx.recv_timeout(timeout) {
            Ok(conn) => Ok(PooledConnection::new(self, conn)),
            Err(RecvTimeoutError::Timeout) => Err(PoolError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(PoolError::Closed),
        }
    }

    fn open(&self) -> Result<PooledExecutor, PoolError> {
        let conn = connect(&self.details)?;
        self.created.fetch_add(1, Ordering::AcqRel);
        Ok(conn)
    }

    fn release(&self, conn: PooledExecutor) {
        if self.idle_tx.try_send(conn).is_err() {
            self.created.fetch_sub(1, Ordering::AcqRel);
            log::warn!("Dropping connection returned to a full pool");
        }
    }
}

/// A checked-out connection; returns to the pool on drop
pub struct PooledConnection<'a> {
    pool: &'a DbPool,
    conn: Option<PooledExecutor>,
}

impl<'a> PooledConnection<'a> {
    fn new(pool: &'a DbPool, conn: PooledExecutor) -> Self {
        Self {
            pool,
            conn: Some(conn),
        }
    }
}

impl std::fmt::Debug for PooledConnection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl Deref for PooledConnection<'_> {
    type Target = dyn DockExecutor + Send;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn.as_ref(),
            // only taken in drop
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sqlite_pool(max: usize, timeout_secs: u64) -> (TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let details = ConnectionDetails::Sqlite {
            path: dir.path().join("pool.db"),
        };
        let pool = DbPool::new(details, PoolConfig::new(max, timeout_secs)).unwrap();
        (dir, pool)
    }

    #[test]
    fn test_first_connection_opened_eagerly() {
        let (_dir, pool) = sqlite_pool(3, 1);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.engine(), Engine::Sqlite);
    }

    #[test]
    fn test_connections_grow_lazily_and_return() {
        let (_dir, pool) = sqlite_pool(2, 1);
        {
            let a = pool.acquire().unwrap();
            let b = pool.acquire().unwrap();
            assert_eq!(pool.size(), 2);
            assert_eq!(pool.idle(), 0);
            a.execute("CREATE TABLE t (v INTEGER)").unwrap();
            b.execute("INSERT INTO t (v) VALUES (1)").unwrap();
        }
        assert_eq!(pool.idle(), 2);
        let conn = pool.acquire().unwrap();
        assert_eq!(conn.query_one("SELECT COUNT(*) FROM t").unwrap().get_i64(0).unwrap(), 1);
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_exhausted_pool_times_out() {
        let (_dir, pool) = sqlite_pool(1, 0);
        let _held = pool.acquire().unwrap();
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, PoolError::Timeout(d) if d == Duration::ZERO), "{err}");
    }

    #[test]
    fn test_waiter_gets_returned_connection() {
        let (_dir, pool) = sqlite_pool(1, 5);
        let pool = std::sync::Arc::new(pool);
        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.acquire().map(|_| ()).is_ok())
        };
        std::thread::sleep(Duration::from_millis(50));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_connect_failure_reported() {
        let details = ConnectionDetails::Sqlite {
            path: "/nonexistent-dir/drydock/pool.db".into(),
        };
        let err = DbPool::new(details, PoolConfig::default()).unwrap_err();
        assert!(matches!(err, PoolError::Connect(_)), "{err}");
    }
}
