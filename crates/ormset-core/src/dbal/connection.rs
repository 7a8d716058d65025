//! Database connections.
//!
//! The collection engine talks to storage through the [`Connection`] trait.
//! [`SqliteConnection`] implements it over `rusqlite` and records every
//! statement it runs so callers can inspect how many round-trips a fetch took.

use std::sync::Arc;
use std::time::Instant;

use ormset_proto::Value;
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use tracing::{debug, warn};

use crate::config::OrmConfig;
use crate::error::{Error, Result};

use super::platform::Platform;

/// A result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Value of a column by name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Value of a column by position.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// A database connection.
pub trait Connection: Send + Sync {
    /// SQL dialect of the connection.
    fn platform(&self) -> Platform;

    /// Run a query returning rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a statement returning the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize>;

    fn begin_transaction(&self) -> Result<()>;

    fn commit_transaction(&self) -> Result<()>;

    fn rollback_transaction(&self) -> Result<()>;

    /// Identifier generated by the last INSERT.
    fn last_inserted_id(&self, sequence: Option<&str>) -> Result<Value>;
}

/// An executed statement with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// SQLite connection.
pub struct SqliteConnection {
    conn: Mutex<rusqlite::Connection>,
    log: Mutex<Vec<ExecutedStatement>>,
    slow_query_threshold_ms: Option<u64>,
}

impl SqliteConnection {
    /// Wrap an open rusqlite connection.
    pub fn new(conn: rusqlite::Connection, config: &OrmConfig) -> Result<Self> {
        // LIKE must be case sensitive to agree with in-memory matching.
        conn.execute_batch("PRAGMA case_sensitive_like = ON; PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            log: Mutex::new(Vec::new()),
            slow_query_threshold_ms: config.slow_query_threshold_ms,
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(config: &OrmConfig) -> Result<Self> {
        Self::new(rusqlite::Connection::open_in_memory()?, config)
    }

    /// Open a database file.
    pub fn open(path: impl AsRef<std::path::Path>, config: &OrmConfig) -> Result<Self> {
        Self::new(rusqlite::Connection::open(path)?, config)
    }

    /// Run a batch of statements without parameters, e.g. schema setup.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    /// Statements run through [`Connection::query`] and [`Connection::execute`].
    pub fn executed_statements(&self) -> Vec<ExecutedStatement> {
        self.log.lock().clone()
    }

    /// Number of logged statements.
    pub fn statement_count(&self) -> usize {
        self.log.lock().len()
    }

    pub fn reset_statement_log(&self) {
        self.log.lock().clear();
    }

    fn record(&self, sql: &str, params: &[Value], started: Instant) {
        let elapsed = started.elapsed();
        debug!(sql, params = ?params, elapsed_us = elapsed.as_micros() as u64, "executed statement");
        if let Some(threshold) = self.slow_query_threshold_ms {
            if elapsed.as_millis() as u64 >= threshold {
                warn!(sql, elapsed_ms = elapsed.as_millis() as u64, threshold, "slow statement");
            }
        }
        self.log.lock().push(ExecutedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
    }
}

impl Connection for SqliteConnection {
    fn platform(&self) -> Platform {
        Platform::Sqlite
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let started = Instant::now();
        let bound = to_sql_values(params)?;
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(sql)?;
            let columns: Arc<[String]> = stmt
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
                .into();
            let width = columns.len();
            let mut rows = stmt.query(rusqlite::params_from_iter(bound.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(from_sql_value(row.get::<_, SqlValue>(i)?));
                }
                out.push(Row::new(columns.clone(), values));
            }
            out
        };
        self.record(sql, params, started);
        Ok(rows)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let started = Instant::now();
        let bound = to_sql_values(params)?;
        let affected = self
            .conn
            .lock()
            .execute(sql, rusqlite::params_from_iter(bound.iter()))?;
        self.record(sql, params, started);
        Ok(affected)
    }

    fn begin_transaction(&self) -> Result<()> {
        debug!("begin transaction");
        self.conn.lock().execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit_transaction(&self) -> Result<()> {
        debug!("commit transaction");
        self.conn.lock().execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback_transaction(&self) -> Result<()> {
        debug!("rollback transaction");
        self.conn.lock().execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn last_inserted_id(&self, _sequence: Option<&str>) -> Result<Value> {
        Ok(Value::Int(self.conn.lock().last_insert_rowid()))
    }
}

fn to_sql_values(params: &[Value]) -> Result<Vec<SqlValue>> {
    params.iter().map(to_sql_value).collect()
}

fn to_sql_value(value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Timestamp(t) => SqlValue::Integer(*t),
        Value::List(_) => {
            return Err(Error::invalid_argument(
                "lists cannot be bound as a single parameter",
            ))
        }
    })
}

fn from_sql_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Int(i),
        SqlValue::Real(f) => Value::Float(f),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::Bytes(b),
    }
}
