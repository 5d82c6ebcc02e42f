//! Storage Layer - connection providers
//!
//! The mapper never talks to a driver directly. It hands compiled
//! statements to a [`ConnectionProvider`], which owns the connections and
//! the background executor that database work runs on:
//! - `execute` for DDL and single-row mutations
//! - `query` for row retrieval
//! - `execute_batch` for one parameterized statement over many rows
//!
//! [`SqliteProvider`] is the embedded-file implementation. Network stores
//! are provided by the application through the same trait.

pub mod sqlite;

pub use sqlite::SqliteProvider;

use crate::Result;
use crate::statements::{Dialect, Statement};
use crate::value::SqlValue;
use async_trait::async_trait;
use std::sync::Arc;

/// Result of a mutating statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    /// Key generated by the store for an auto-increment column
    pub generated_key: Option<i64>,
}

/// One retrieved row. Columns are looked up case-insensitively by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, SqlValue)>,
        S: Into<String>,
    {
        let (columns, values): (Vec<String>, Vec<SqlValue>) =
            pairs.into_iter().map(|(c, v)| (c.into(), v)).unzip();
        Self {
            columns: columns.into(),
            values,
        }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|idx| self.values.get(idx))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

/// Asynchronous access to a relational store.
#[async_trait]
pub trait ConnectionProvider: Send + Sync + 'static {
    /// Dialect of the statements this provider accepts
    fn dialect(&self) -> Dialect;

    async fn execute(&self, statement: Statement) -> Result<ExecOutcome>;

    async fn query(&self, statement: Statement) -> Result<Vec<Row>>;

    /// Run `sql` once per parameter row on one connection with auto-commit
    /// off, committing every `commit_every` rows and once at the end.
    /// Returns the number of rows written.
    async fn execute_batch(&self, sql: String, rows: Vec<Vec<SqlValue>>, commit_every: usize) -> Result<u64>;

    /// Release connections and stop the executor. Later calls fail with `Error::Closed`.
    async fn close(&self) {}
}
