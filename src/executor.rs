//! `DockExecutor` Module
//!
//! Provides the `DockExecutor` trait that abstracts statement execution over the
//! supported drivers (`rusqlite`, `may_postgres` and, with the `mysql` feature, `mysql`).
//!
//! The migration machinery never talks to a driver directly: bookkeeping, locking and
//! changeset application all go through this trait, so the same protocol runs against
//! every engine.

use crate::connection::Engine;
use std::fmt;

mod postgres;
mod sqlite;
#[cfg(feature = "mysql")]
mod mysql;

#[cfg(feature = "mysql")]
pub use self::mysql::MySqlExecutor;
pub use self::postgres::PostgresExecutor;
pub use self::sqlite::SqliteExecutor;

/// `DockExecutor` error type
#[derive(Debug)]
pub enum DockError {
    /// SQLite error from `rusqlite`
    SqliteError(rusqlite::Error),
    /// `PostgreSQL` error from `may_postgres`
    PostgresError(may_postgres::Error),
    /// MySQL error from `mysql`
    #[cfg(feature = "mysql")]
    MySqlError(::mysql::Error),
    /// Query execution error
    QueryError(String),
    /// Row parsing/conversion error
    ParseError(String),
    /// Other execution errors
    Other(String),
}

impl fmt::Display for DockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DockError::SqliteError(e) => write!(f, "SQLite error: {e}"),
            DockError::PostgresError(e) => write!(f, "PostgreSQL error: {e}"),
            #[cfg(feature = "mysql")]
            DockError::MySqlError(e) => write!(f, "MySQL error: {e}"),
            DockError::QueryError(s) => write!(f, "Query error: {s}"),
            DockError::ParseError(s) => write!(f, "Parse error: {s}"),
            DockError::Other(s) => write!(f, "Execution error: {s}"),
        }
    }
}

impl std::error::Error for DockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DockError::SqliteError(e) => Some(e),
            DockError::PostgresError(e) => Some(e),
            #[cfg(feature = "mysql")]
            DockError::MySqlError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DockError {
    fn from(err: rusqlite::Error) -> Self {
        DockError::SqliteError(err)
    }
}

impl From<may_postgres::Error> for DockError {
    fn from(err: may_postgres::Error) -> Self {
        DockError::PostgresError(err)
    }
}

#[cfg(feature = "mysql")]
impl From<::mysql::Error> for DockError {
    fn from(err: ::mysql::Error) -> Self {
        DockError::MySqlError(err)
    }
}

/// A single decoded column value
///
/// Drivers decode into this small set of variants so bookkeeping code can read rows
/// without knowing which engine produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum DockValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Bool(bool),
    Bytes(Vec<u8>),
}

/// A row returned by [`DockExecutor::query_all`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DockRow {
    values: Vec<DockValue>,
}

impl DockRow {
    pub fn new(values: Vec<DockValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&DockValue> {
        self.values.get(idx)
    }

    fn value(&self, idx: usize) -> Result<&DockValue, DockError> {
        self.values.get(idx).ok_or_else(|| {
            DockError::ParseError(format!(
                "column index {idx} out of range (row has {} columns)",
                self.values.len()
            ))
        })
    }

    /// Read an integer column. Booleans read as 0/1 and numeric text is parsed.
    ///
    /// # Errors
    ///
    /// Returns `DockError::ParseError` for NULL or non-numeric values.
    pub fn get_i64(&self, idx: usize) -> Result<i64, DockError> {
        match self.value(idx)? {
            DockValue::Int(v) => Ok(*v),
            DockValue::Bool(b) => Ok(i64::from(*b)),
            DockValue::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| DockError::ParseError(format!("column {idx}: '{s}' is not an integer"))),
            other => Err(DockError::ParseError(format!(
                "column {idx}: expected integer, found {other:?}"
            ))),
        }
    }

    /// Read a nullable text column. Numbers are rendered with `to_string`.
    pub fn get_opt_string(&self, idx: usize) -> Result<Option<String>, DockError> {
        match self.value(idx)? {
            DockValue::Null => Ok(None),
            DockValue::Text(s) => Ok(Some(s.clone())),
            DockValue::Int(v) => Ok(Some(v.to_string())),
            DockValue::Real(v) => Ok(Some(v.to_string())),
            DockValue::Bool(b) => Ok(Some(b.to_string())),
            DockValue::Bytes(b) => Ok(Some(String::from_utf8_lossy(b).into_owned())),
        }
    }

    /// Read a non-null text column.
    pub fn get_string(&self, idx: usize) -> Result<String, DockError> {
        self.get_opt_string(idx)?
            .ok_or_else(|| DockError::ParseError(format!("column {idx}: unexpected NULL")))
    }

    /// Read a boolean column. Integers are truthy when non-zero.
    pub fn get_bool(&self, idx: usize) -> Result<bool, DockError> {
        match self.value(idx)? {
            DockValue::Bool(b) => Ok(*b),
            DockValue::Int(v) => Ok(*v != 0),
            DockValue::Text(s) => match s.to_ascii_lowercase().as_str() {
                "t" | "true" | "1" => Ok(true),
                "f" | "false" | "0" => Ok(false),
                _ => Err(DockError::ParseError(format!("column {idx}: '{s}' is not a boolean"))),
            },
            other => Err(DockError::ParseError(format!(
                "column {idx}: expected boolean, found {other:?}"
            ))),
        }
    }
}

/// Trait for executing database statements
///
/// Statements are passed as complete SQL text. Bookkeeping SQL is rendered with
/// `sea-query` for the executor's [`Engine`], so no bind parameters are needed.
///
/// # Examples
///
/// ```no_run
/// use drydock::executor::{DockError, DockExecutor, SqliteExecutor};
///
/// # fn main() -> Result<(), DockError> {
/// let executor = SqliteExecutor::open_in_memory()?;
/// executor.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
/// executor.execute("INSERT INTO users (name) VALUES ('alice')")?;
///
/// let count = executor.query_one("SELECT COUNT(*) FROM users")?.get_i64(0)?;
/// assert_eq!(count, 1);
/// # Ok(())
/// # }
/// ```
pub trait DockExecutor {
    /// The engine this executor talks to
    fn engine(&self) -> Engine;

    /// Execute a SQL statement and return the number of rows affected
    ///
    /// # Returns
    ///
    /// Returns the number of rows affected (for INSERT, UPDATE, DELETE) or `Ok(0)` for other statements.
    ///
    /// # Errors
    ///
    /// Returns `DockError` if the statement fails.
    fn execute(&self, sql: &str) -> Result<u64, DockError>;

    /// Execute a query and return all rows
    ///
    /// # Errors
    ///
    /// Returns `DockError` if the query execution fails or a value cannot be decoded.
    fn query_all(&self, sql: &str) -> Result<Vec<DockRow>, DockError>;

    /// Execute a query and return a single row
    ///
    /// # Errors
    ///
    /// Returns `DockError` if:
    /// - The query execution fails
    /// - No rows are returned
    /// - Multiple rows are returned
    fn query_one(&self, sql: &str) -> Result<DockRow, DockError> {
        let mut rows = self.query_all(sql)?;
        match rows.len() {
            1 => Ok(rows.remove(0)),
            0 => Err(DockError::QueryError("query returned no rows".to_string())),
            n => Err(DockError::QueryError(format!(
                "query returned {n} rows, expected exactly one"
            ))),
        }
    }
}
