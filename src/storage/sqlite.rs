//! SQLite connection provider
//!
//! One connection behind a mutex. Every operation runs on tokio's blocking
//! pool and takes the mutex, so database work is serialized exactly as on a
//! single-threaded executor.

use super::{ConnectionProvider, ExecOutcome, Row};
use crate::statements::{Dialect, Statement};
use crate::value::SqlValue;
use crate::{Error, Result};
use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql, params_from_iter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Embedded-file store backed by `rusqlite`
pub struct SqliteProvider {
    conn: Arc<Mutex<Option<Connection>>>,
    path: Option<PathBuf>,
}

impl SqliteProvider {
    /// Open a database file (creates it and missing parent directories)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        info!(path = %path.display(), "Opened embedded store");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: None,
        })
    }

    fn configure(conn: &Connection) -> Result<()> {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        debug!(journal_mode = %mode, "Configured connection");
        Ok(())
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `op` on the connection off the async runtime.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let connection = guard.as_mut().ok_or(Error::Closed)?;
            op(connection)
        })
        .await
        .map_err(|e| Error::Query(format!("storage worker failed: {}", e)))?
    }
}

#[async_trait]
impl ConnectionProvider for SqliteProvider {
    fn dialect(&self) -> Dialect {
        Dialect::Embedded
    }

    async fn execute(&self, statement: Statement) -> Result<ExecOutcome> {
        self.run(move |conn| {
            let rows = conn.execute(&statement.sql, params_from_iter(statement.params.iter()))?;
            let inserted = rows > 0
                && statement
                    .sql
                    .trim_start()
                    .get(..6)
                    .is_some_and(|verb| verb.eq_ignore_ascii_case("INSERT"));
            Ok(ExecOutcome {
                rows_affected: rows as u64,
                generated_key: inserted.then(|| conn.last_insert_rowid()),
            })
        })
        .await
    }

    async fn query(&self, statement: Statement) -> Result<Vec<Row>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&statement.sql)?;
            let columns: Arc<[String]> = stmt
                .column_names()
                .into_iter()
                .map(String::from)
                .collect();
            let count = columns.len();

            let values = stmt.query_map(params_from_iter(statement.params.iter()), |row| {
                (0..count)
                    .map(|idx| row.get_ref(idx).map(SqlValue::from))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })?;

            let mut rows = Vec::new();
            for row in values {
                rows.push(Row::new(Arc::clone(&columns), row?));
            }
            Ok(rows)
        })
        .await
    }

    async fn execute_batch(&self, sql: String, rows: Vec<Vec<SqlValue>>, commit_every: usize) -> Result<u64> {
        self.run(move |conn| {
            let mut written = 0u64;
            for chunk in rows.chunks(commit_every.max(1)) {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare_cached(&sql)?;
                    for params in chunk {
                        stmt.execute(params_from_iter(params.iter()))?;
                    }
                }
                tx.commit()?;
                written += chunk.len() as u64;
                debug!(rows = written, "Committed batch chunk");
            }
            Ok(written)
        })
        .await
    }

    async fn close(&self) {
        let conn = Arc::clone(&self.conn);
        let closed = tokio::task::spawn_blocking(move || {
            conn.lock().unwrap_or_else(PoisonError::into_inner).take().is_some()
        })
        .await
        .unwrap_or(false);
        if closed {
            info!("Closed embedded store");
        }
    }
}

// ========== rusqlite Conversions ==========

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn people(provider: &SqliteProvider) {
        provider
            .execute(Statement::new(
                "CREATE TABLE IF NOT EXISTS people (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let provider = SqliteProvider::open_in_memory().unwrap();
        people(&provider).await;

        let outcome = provider
            .execute(Statement::with_params(
                "INSERT OR REPLACE INTO people (id, name) VALUES (?, ?);",
                vec![SqlValue::Null, SqlValue::Text("ada".into())],
            ))
            .await
            .unwrap();
        assert_eq!(outcome.rows_affected, 1);
        assert_eq!(outcome.generated_key, Some(1));

        let rows = provider
            .query(Statement::new("SELECT * FROM people;"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("ID"), Some(&SqlValue::Integer(1)));
        assert_eq!(rows[0].get("name"), Some(&SqlValue::Text("ada".into())));
    }

    #[tokio::test]
    async fn test_delete_reports_no_generated_key() {
        let provider = SqliteProvider::open_in_memory().unwrap();
        people(&provider).await;
        provider
            .execute(Statement::new("INSERT INTO people (id, name) VALUES (7, 'x');"))
            .await
            .unwrap();

        let outcome = provider
            .execute(Statement::new("DELETE FROM people WHERE id = '7';"))
            .await
            .unwrap();
        assert_eq!(outcome.rows_affected, 1);
        assert_eq!(outcome.generated_key, None);
    }

    #[tokio::test]
    async fn test_batch_commits_in_chunks() {
        let provider = SqliteProvider::open_in_memory().unwrap();
        people(&provider).await;

        let rows: Vec<Vec<SqlValue>> = (1..=5)
            .map(|i| vec![SqlValue::Integer(i), SqlValue::Text(format!("p{}", i))])
            .collect();
        let written = provider
            .execute_batch("INSERT OR REPLACE INTO people (id, name) VALUES (?, ?);".into(), rows, 2)
            .await
            .unwrap();
        assert_eq!(written, 5);

        let rows = provider
            .query(Statement::new("SELECT COUNT(*) AS n FROM people;"))
            .await
            .unwrap();
        assert_eq!(rows[0].get("n"), Some(&SqlValue::Integer(5)));
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back_its_chunk() {
        let provider = SqliteProvider::open_in_memory().unwrap();
        people(&provider).await;

        let rows = vec![
            vec![SqlValue::Integer(1), SqlValue::Text("ok".into())],
            vec![SqlValue::Integer(2), SqlValue::Null],
        ];
        let result = provider
            .execute_batch("INSERT INTO people (id, name) VALUES (?, ?);".into(), rows, 10)
            .await;
        assert!(result.is_err());

        let rows = provider
            .query(Statement::new("SELECT * FROM people;"))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_closed_provider_refuses_work() {
        let provider = SqliteProvider::open_in_memory().unwrap();
        provider.close().await;
        let result = provider.query(Statement::new("SELECT 1;")).await;
        assert!(matches!(result, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_file_store_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.db");
        let provider = SqliteProvider::open(&path).unwrap();
        people(&provider).await;

        assert!(path.exists());
        assert_eq!(provider.path(), Some(path.as_path()));

        let rows = provider
            .query(Statement::new("PRAGMA journal_mode;"))
            .await
            .unwrap();
        assert_eq!(rows[0].values()[0], SqlValue::Text("wal".into()));
    }
}
