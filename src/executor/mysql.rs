//! MySQL / MariaDB executor backed by the `mysql` crate

use super::{DockError, DockExecutor, DockRow, DockValue};
use crate::connection::Engine;
use ::mysql::prelude::Queryable;
use ::mysql::{Conn, Opts, Row, Value};
use std::cell::RefCell;

/// Executor over a single `mysql::Conn`
///
/// `Queryable` needs `&mut Conn`; the executor hands out `&self`, so the connection
/// lives in a `RefCell`. An executor is only ever driven by one thread at a time.
pub struct MySqlExecutor {
    conn: RefCell<Conn>,
}

impl MySqlExecutor {
    pub fn new(conn: Conn) -> Self {
        Self {
            conn: RefCell::new(conn),
        }
    }

    /// Connect using a `mysql://` URL
    pub fn connect(url: &str) -> Result<Self, DockError> {
        let opts = Opts::from_url(url)
            .map_err(|e| DockError::Other(format!("Invalid MySQL URL: {e}")))?;
        Ok(Self::new(Conn::new(opts)?))
    }
}

fn decode(value: Value) -> DockValue {
    match value {
        Value::NULL => DockValue::Null,
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => DockValue::Text(text),
            Err(e) => DockValue::Bytes(e.into_bytes()),
        },
        Value::Int(v) => DockValue::Int(v),
        Value::UInt(v) => i64::try_from(v)
            .map(DockValue::Int)
            .unwrap_or_else(|_| DockValue::Text(v.to_string())),
        Value::Float(v) => DockValue::Real(f64::from(v)),
        Value::Double(v) => DockValue::Real(v),
        Value::Date(y, mo, d, h, mi, s, us) => DockValue::Text(format!(
            "{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}.{us:06}"
        )),
        Value::Time(neg, days, h, mi, s, us) => DockValue::Text(format!(
            "{}{} {h:02}:{mi:02}:{s:02}.{us:06}",
            if neg { "-" } else { "" },
            days
        )),
    }
}

fn decode_row(row: Row) -> DockRow {
    DockRow::new(
        row.unwrap_raw()
            .into_iter()
            .map(|value| value.map_or(DockValue::Null, decode))
            .collect(),
    )
}

impl DockExecutor for MySqlExecutor {
    fn engine(&self) -> Engine {
        Engine::MySql
    }

    fn execute(&self, sql: &str) -> Result<u64, DockError> {
        let mut conn = self.conn.borrow_mut();
        conn.query_drop(sql)?;
        Ok(conn.affected_rows())
    }

    fn query_all(&self, sql: &str) -> Result<Vec<DockRow>, DockError> {
        let rows: Vec<Row> = self.conn.borrow_mut().query(sql)?;
        Ok(rows.into_iter().map(decode_row).collect())
    }
}
