//! SQLite executor backed by `rusqlite`

use super::{DockError, DockExecutor, DockRow, DockValue};
use crate::connection::Engine;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

/// How long a statement waits on another connection's write lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Executor over an embedded SQLite database file
pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    /// Wrap an already-open connection
    pub fn new(conn: Connection) -> Result<Self, DockError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { conn })
    }

    /// Open (creating if needed) the database file at `path`
    ///
    /// File-backed databases are switched to WAL so pooled readers do not block the
    /// migration writer.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DockError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        if path != Path::new(":memory:") {
            let _mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        }
        Self::new(conn)
    }

    /// Open a database file that must already exist
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, DockError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        Self::new(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, DockError> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Get a reference to the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn decode(value: ValueRef<'_>) -> DockValue {
    match value {
        ValueRef::Null => DockValue::Null,
        ValueRef::Integer(v) => DockValue::Int(v),
        ValueRef::Real(v) => DockValue::Real(v),
        ValueRef::Text(bytes) => DockValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => DockValue::Bytes(bytes.to_vec()),
    }
}

impl DockExecutor for SqliteExecutor {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn execute(&self, sql: &str) -> Result<u64, DockError> {
        let affected = self.conn.execute(sql, [])?;
        Ok(affected as u64)
    }

    fn query_all(&self, sql: &str) -> Result<Vec<DockRow>, DockError> {
        let mut stmt = self.conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                values.push(decode(row.get_ref(idx)?));
            }
            out.push(DockRow::new(values));
        }
        Ok(out)
    }
}
