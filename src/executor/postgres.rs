//! `PostgreSQL` executor backed by `may_postgres`

use super::{DockError, DockExecutor, DockRow, DockValue};
use crate::connection::Engine;
use may_postgres::types::Type;
use may_postgres::{Client, Row};

/// Executor over a `may_postgres::Client`
pub struct PostgresExecutor {
    client: Client,
}

impl PostgresExecutor {
    /// Create a new executor from a `may_postgres::Client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using a libpq key-value or URL connection string
    pub fn connect(connection_string: &str) -> Result<Self, DockError> {
        let client = may_postgres::connect(connection_string)?;
        Ok(Self::new(client))
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn decode_row(row: &Row) -> Result<DockRow, DockError> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)?.map(DockValue::Int)
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)?
                .map(|v| DockValue::Int(i64::from(v)))
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)?
                .map(|v| DockValue::Int(i64::from(v)))
        } else if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)?.map(DockValue::Bool)
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx)?.map(DockValue::Real)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(idx)?
                .map(|v| DockValue::Real(f64::from(v)))
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(idx)?.map(DockValue::Bytes)
        } else {
            row.try_get::<_, Option<String>>(idx)
                .map_err(|e| {
                    DockError::ParseError(format!(
                        "column '{}' of type {ty} cannot be read as text: {e}",
                        column.name()
                    ))
                })?
                .map(DockValue::Text)
        };
        values.push(value.unwrap_or(DockValue::Null));
    }
    Ok(DockRow::new(values))
}

impl DockExecutor for PostgresExecutor {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    fn execute(&self, sql: &str) -> Result<u64, DockError> {
        Ok(self.client.execute(sql, &[])?)
    }

    fn query_all(&self, sql: &str) -> Result<Vec<DockRow>, DockError> {
        let rows = self.client.query(sql, &[])?;
        rows.iter().map(decode_row).collect()
    }
}
