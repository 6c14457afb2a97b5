//! The execution capability dbsync consumes, and a traced wrapper around it.
//!
//! dbsync never opens connections itself. Callers hand in anything that can
//! run a [`Statement`] and report the server version; the driver, pooling and
//! timeouts all live on their side of this trait.

use crate::error::BoxError;
use dbsync_schema::{Value, parse_bool};
use dbsync_sql::Statement;
use indexmap::IndexMap;
use tracing::field;

/// Something that can run statements against a live database.
///
/// All calls block until the server answers.
pub trait Executor {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Run a statement that returns rows.
    fn query(&mut self, stmt: &Statement) -> Result<Vec<Row>, Self::Error>;

    /// Run a statement, returning the number of rows affected.
    fn execute(&mut self, stmt: &Statement) -> Result<u64, Self::Error>;

    /// The server's product version, e.g. `"15.0.2000.5"`.
    fn server_version(&mut self) -> Result<String, Self::Error>;
}

impl<E: Executor + ?Sized> Executor for &mut E {
    type Error = E::Error;

    fn query(&mut self, stmt: &Statement) -> Result<Vec<Row>, Self::Error> {
        (**self).query(stmt)
    }

    fn execute(&mut self, stmt: &Statement) -> Result<u64, Self::Error> {
        (**self).execute(stmt)
    }

    fn server_version(&mut self) -> Result<String, Self::Error> {
        (**self).server_version()
    }
}

/// One result row: column name to value, in result-set order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: IndexMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter, mostly for drivers and tests.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    fn require(&self, column: &str) -> Result<&Value, BoxError> {
        self.values
            .get(column)
            .ok_or_else(|| format!("result set has no column '{}'", column).into())
    }

    /// The column rendered as text. NULL reads as an empty string.
    pub fn text(&self, column: &str) -> Result<String, BoxError> {
        Ok(match self.require(column)? {
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    /// The column as an integer. Text is parsed; NULL is an error.
    pub fn integer(&self, column: &str) -> Result<i64, BoxError> {
        match self.require(column)? {
            Value::Integer(v) => Ok(*v),
            Value::Boolean(v) => Ok(i64::from(*v)),
            Value::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| format!("column '{}' is not an integer: {:?}", column, s).into()),
            other => Err(format!("column '{}' is not an integer: {}", column, other).into()),
        }
    }

    /// The column as a flag. Accepts BIT values, 0/1 and `true`/`false` text.
    pub fn flag(&self, column: &str) -> Result<bool, BoxError> {
        match self.require(column)? {
            Value::Boolean(v) => Ok(*v),
            Value::Integer(v) => Ok(*v != 0),
            Value::Text(s) => parse_bool(s)
                .ok_or_else(|| format!("column '{}' is not a flag: {:?}", column, s).into()),
            other => Err(format!("column '{}' is not a flag: {}", column, other).into()),
        }
    }
}

/// A wrapper around an executor that logs all statements via tracing.
///
/// Every call runs inside a `db.query` or `db.execute` debug span carrying
/// the SQL text and parameter count, and records the row count or affected
/// count once the call returns.
pub struct Traced<'a, E: Executor + ?Sized> {
    inner: &'a mut E,
}

impl<'a, E: Executor + ?Sized> Traced<'a, E> {
    pub fn new(inner: &'a mut E) -> Self {
        Self { inner }
    }

    pub fn query(&mut self, stmt: &Statement) -> Result<Vec<Row>, E::Error> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %stmt.sql,
            params = stmt.params.len(),
            rows = field::Empty,
        );
        let _enter = span.enter();
        let rows = self.inner.query(stmt)?;
        span.record("rows", rows.len());
        Ok(rows)
    }

    pub fn execute(&mut self, stmt: &Statement) -> Result<u64, E::Error> {
        let span = tracing::debug_span!(
            "db.execute",
            sql = %stmt.sql,
            params = stmt.params.len(),
            affected = field::Empty,
        );
        let _enter = span.enter();
        let affected = self.inner.execute(stmt)?;
        span.record("affected", affected);
        Ok(affected)
    }

    pub fn server_version(&mut self) -> Result<String, E::Error> {
        self.inner.server_version()
    }
}

/// Extension trait to get a traced wrapper from an executor.
pub trait ExecutorExt: Executor {
    /// Wrap this executor in a [`Traced`] for statement logging.
    fn traced(&mut self) -> Traced<'_, Self> {
        Traced::new(self)
    }
}

impl<E: Executor + ?Sized> ExecutorExt for E {}
