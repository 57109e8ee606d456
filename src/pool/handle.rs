//! Process-wide database handle
//!
//! Setup installs the pool here once migrations are done. Until then
//! [`default_database`] returns `None`.

use super::{DbPool, PoolError, PooledConnection};
use crate::connection::{Engine, QuoteStyle};
use once_cell::sync::Lazy;
use std::sync::{Arc, PoisonError, RwLock};

static DEFAULT: Lazy<RwLock<Option<Arc<DatabaseHandle>>>> = Lazy::new(|| RwLock::new(None));

/// A pool paired with its engine's identifier quoting
#[derive(Debug)]
pub struct DatabaseHandle {
    pool: Arc<DbPool>,
    quoting: QuoteStyle,
}

impl DatabaseHandle {
    pub fn new(pool: Arc<DbPool>) -> Self {
        let quoting = pool.engine().quote_style();
        Self { pool, quoting }
    }

    pub fn pool(&self) -> &Arc<DbPool> {
        &self.pool
    }

    pub fn engine(&self) -> Engine {
        self.pool.engine()
    }

    pub fn quoting(&self) -> QuoteStyle {
        self.quoting
    }

    /// Quote an identifier the way this database expects
    pub fn quote(&self, ident: &str) -> String {
        self.quoting.quote(ident)
    }

    pub fn acquire(&self) -> Result<PooledConnection<'_>, PoolError> {
        self.pool.acquire()
    }
}

/// Install `pool` as the process-wide database, replacing any previous one
pub fn install_default(pool: Arc<DbPool>) -> Arc<DatabaseHandle> {
    let handle = Arc::new(DatabaseHandle::new(pool));
    let mut slot = DEFAULT.write().unwrap_or_else(PoisonError::into_inner);
    if slot.replace(handle.clone()).is_some() {
        log::warn!("Replacing previously installed default database");
    }
    log::debug!("Installed default database ({})", handle.engine());
    handle
}

/// The installed process-wide database, if setup has reached that point
pub fn default_database() -> Option<Arc<DatabaseHandle>> {
    DEFAULT
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionDetails;
    use crate::pool::PoolConfig;

    #[test]
    fn test_install_and_read_default() {
        let dir = tempfile::tempdir().unwrap();
        let details = ConnectionDetails::Sqlite {
            path: dir.path().join("handle.db"),
        };
        let pool = Arc::new(DbPool::new(details, PoolConfig::new(2, 1)).unwrap());
        let installed = install_default(pool.clone());

        assert_eq!(installed.quoting(), QuoteStyle::DoubleQuote);
        assert_eq!(installed.quote("order"), "\"order\"");
        assert!(Arc::ptr_eq(installed.pool(), &pool));
        // other tests may install their own pool concurrently
        assert!(default_database().is_some());

        let conn = installed.acquire().unwrap();
        assert_eq!(conn.query_one("SELECT 1").unwrap().get_i64(0).unwrap(), 1);
    }
}
