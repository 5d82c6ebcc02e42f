#![allow(dead_code)]

use async_trait::async_trait;
use rowcache::storage::ExecOutcome;
use rowcache::{ConnectionProvider, Dialect, Error, Result, Row, SqlValue, SqliteProvider, Statement};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Wraps a SQLite provider and counts lookups by id.
pub struct CountingProvider {
    inner: SqliteProvider,
    lookups: AtomicUsize,
    queries: AtomicUsize,
}

impl CountingProvider {
    pub fn open(path: &Path) -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteProvider::open(path).unwrap(),
            lookups: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        })
    }

    /// `SELECT ... WHERE pk = v` statements seen so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionProvider for CountingProvider {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn execute(&self, statement: Statement) -> Result<ExecOutcome> {
        self.inner.execute(statement).await
    }

    async fn query(&self, statement: Statement) -> Result<Vec<Row>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if statement.sql.contains(" WHERE ") {
            self.lookups.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.query(statement).await
    }

    async fn execute_batch(&self, sql: String, rows: Vec<Vec<SqlValue>>, commit_every: usize) -> Result<u64> {
        self.inner.execute_batch(sql, rows, commit_every).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

/// In-memory SQLite provider that refuses to create one table.
pub struct FailingCreate {
    inner: SqliteProvider,
    table: &'static str,
}

impl FailingCreate {
    pub fn new(table: &'static str) -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteProvider::open_in_memory().unwrap(),
            table,
        })
    }
}

#[async_trait]
impl ConnectionProvider for FailingCreate {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn execute(&self, statement: Statement) -> Result<ExecOutcome> {
        if statement
            .sql
            .starts_with(&format!("CREATE TABLE IF NOT EXISTS {} (", self.table))
        {
            return Err(Error::Query(format!("no space left for '{}'", self.table)));
        }
        self.inner.execute(statement).await
    }

    async fn query(&self, statement: Statement) -> Result<Vec<Row>> {
        self.inner.query(statement).await
    }

    async fn execute_batch(&self, sql: String, rows: Vec<Vec<SqlValue>>, commit_every: usize) -> Result<u64> {
        self.inner.execute_batch(sql, rows, commit_every).await
    }
}

/// Network-dialect provider that records statements and stores nothing.
#[derive(Default)]
pub struct RecordingProvider {
    statements: Mutex<Vec<Statement>>,
}

impl RecordingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().iter().map(|s| s.sql.clone()).collect()
    }
}

#[async_trait]
impl ConnectionProvider for RecordingProvider {
    fn dialect(&self) -> Dialect {
        Dialect::Network
    }

    async fn execute(&self, statement: Statement) -> Result<ExecOutcome> {
        self.statements.lock().unwrap().push(statement);
        Ok(ExecOutcome {
            rows_affected: 1,
            generated_key: None,
        })
    }

    async fn query(&self, statement: Statement) -> Result<Vec<Row>> {
        self.statements.lock().unwrap().push(statement);
        Ok(Vec::new())
    }

    async fn execute_batch(&self, sql: String, rows: Vec<Vec<SqlValue>>, _commit_every: usize) -> Result<u64> {
        let count = rows.len() as u64;
        self.statements.lock().unwrap().push(Statement::new(sql));
        Ok(count)
    }
}

/// Count the rows of a table straight from the store
pub async fn count_rows(provider: &dyn ConnectionProvider, table: &str) -> i64 {
    let rows = provider
        .query(Statement::new(format!("SELECT COUNT(*) AS n FROM {};", table)))
        .await
        .unwrap();
    match rows[0].get("n") {
        Some(SqlValue::Integer(n)) => *n,
        other => panic!("unexpected count {:?}", other),
    }
}
