//! SQLite connection implementation

use async_trait::async_trait;
use ferry_core::{
    ColumnMeta, Connection, FerryError, QueryResult, Result, Row, StatementResult, Transaction,
    Value,
};
use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, OpenFlags, params_from_iter};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// SQLite connection wrapper
pub struct SqliteConnection {
    pub(crate) conn: Arc<Mutex<RusqliteConnection>>,
    read_only: bool,
    closed: AtomicBool,
}

impl SqliteConnection {
    /// Open (or create) a SQLite database for writing
    pub fn open(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening SQLite database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(FerryError::Connection(format!(
                    "Parent directory does not exist: {}",
                    parent.display()
                )));
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = RusqliteConnection::open_with_flags(path, flags).map_err(|e| {
            FerryError::Connection(format!(
                "Failed to open SQLite database at '{}': {}",
                path.display(),
                e
            ))
        })?;

        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| FerryError::Connection(format!("Failed to enable foreign keys: {}", e)))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| FerryError::Connection(format!("Failed to set journal mode: {}", e)))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| FerryError::Connection(format!("Failed to set synchronous mode: {}", e)))?;

        tracing::info!(path = %path.display(), "SQLite database connection established");
        Ok(Self::from_rusqlite(conn, false))
    }

    /// Open an existing SQLite database read-only, for use as an import source
    pub fn open_read_only(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening SQLite database read-only");
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = RusqliteConnection::open_with_flags(path, flags).map_err(|e| {
            FerryError::Connection(format!(
                "Failed to open SQLite database at '{}' read-only: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::from_rusqlite(conn, true))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = RusqliteConnection::open_in_memory().map_err(|e| {
            FerryError::Connection(format!("Failed to open in-memory database: {}", e))
        })?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| FerryError::Connection(format!("Failed to enable foreign keys: {}", e)))?;
        Ok(Self::from_rusqlite(conn, false))
    }

    fn from_rusqlite(conn: RusqliteConnection, read_only: bool) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            read_only,
            closed: AtomicBool::new(false),
        }
    }

    /// Whether the connection was opened read-only
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Execute several `;`-separated statements without parameters
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        tracing::debug!("executing SQL batch");
        let conn = self.conn.lock();
        conn.execute_batch(sql)
            .map_err(|e| FerryError::Query(format!("Failed to execute batch: {}", e)))
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let conn = self.conn.lock();
        execute_on(&conn, sql, params)
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let conn = self.conn.lock();
        query_on(&conn, sql, params)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        tracing::debug!("beginning SQLite transaction");
        {
            let conn = self.conn.lock();
            conn.execute_batch("BEGIN DEFERRED")
                .map_err(|e| FerryError::Transaction(format!("Failed to begin transaction: {}", e)))?;
        }
        Ok(Box::new(SqliteTransaction {
            conn: Arc::clone(&self.conn),
            committed: false,
            rolled_back: false,
        }))
    }

    async fn close(&self) -> Result<()> {
        tracing::info!("closing SQLite connection");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// SQLite transaction wrapper.
///
/// Issues raw `BEGIN DEFERRED` / `COMMIT` / `ROLLBACK` SQL so that it can share
/// the connection `Arc<Mutex<…>>` without rusqlite's borrow-based transaction
/// lifetime.
pub struct SqliteTransaction {
    conn: Arc<Mutex<RusqliteConnection>>,
    committed: bool,
    rolled_back: bool,
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.committed && !self.rolled_back {
            tracing::warn!("SQLite transaction dropped without commit or rollback, issuing automatic rollback");
            let conn = self.conn.lock();
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %e, "automatic rollback on drop failed");
            }
        }
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.rolled_back {
            return Err(FerryError::Transaction("Transaction already rolled back".into()));
        }
        if self.committed {
            return Err(FerryError::Transaction("Transaction already committed".into()));
        }

        {
            let conn = self.conn.lock();
            conn.execute_batch("COMMIT")
                .map_err(|e| FerryError::Transaction(format!("Failed to commit transaction: {}", e)))?;
        }

        self.committed = true;
        tracing::debug!("SQLite transaction committed");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        if self.committed {
            return Err(FerryError::Transaction("Transaction already committed".into()));
        }
        if self.rolled_back {
            return Ok(());
        }

        // Marked first: a failed ROLLBACK must not be retried again by Drop.
        self.rolled_back = true;
        let conn = self.conn.lock();
        conn.execute_batch("ROLLBACK")
            .map_err(|e| FerryError::Transaction(format!("Failed to rollback transaction: {}", e)))?;

        tracing::debug!("SQLite transaction rolled back");
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let conn = self.conn.lock();
        query_on(&conn, sql, params)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let conn = self.conn.lock();
        execute_on(&conn, sql, params)
    }
}

fn execute_on(conn: &RusqliteConnection, sql: &str, params: &[Value]) -> Result<StatementResult> {
    let rusqlite_params = values_to_rusqlite(params);
    // Statements are re-used across rows during a copy, so go through the cache.
    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(|e| FerryError::Query(format!("Failed to prepare statement: {}", e)))?;
    let rows_affected = stmt
        .execute(params_from_iter(rusqlite_params.iter()))
        .map_err(|e| FerryError::Query(format!("Failed to execute statement: {}", e)))?;

    tracing::trace!(affected_rows = rows_affected, "statement executed");
    Ok(StatementResult {
        affected_rows: rows_affected as u64,
    })
}

fn query_on(conn: &RusqliteConnection, sql: &str, params: &[Value]) -> Result<QueryResult> {
    let start_time = std::time::Instant::now();
    let rusqlite_params = values_to_rusqlite(params);

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| FerryError::Query(format!("Failed to prepare query: {}", e)))?;

    let columns: Vec<ColumnMeta> = stmt
        .columns()
        .iter()
        .enumerate()
        .map(|(ordinal, col)| ColumnMeta {
            name: col.name().to_string(),
            data_type: col.decl_type().unwrap_or("DYNAMIC").to_string(),
            ordinal,
        })
        .collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut query_rows = stmt
        .query(params_from_iter(rusqlite_params.iter()))
        .map_err(|e| FerryError::Query(format!("Failed to execute query: {}", e)))?;

    while let Some(row) = query_rows
        .next()
        .map_err(|e| FerryError::Query(format!("Failed to fetch row: {}", e)))?
    {
        rows.push(Row::new(row_values(row, width)?));
    }

    Ok(QueryResult {
        columns,
        rows,
        execution_time_ms: start_time.elapsed().as_millis() as u64,
    })
}

pub(crate) fn row_values(row: &rusqlite::Row<'_>, width: usize) -> Result<Vec<Value>> {
    (0..width).map(|idx| rusqlite_to_value(row, idx)).collect()
}

fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        Value::Int64(i) => rusqlite::types::Value::Integer(*i),
        Value::Float64(f) => rusqlite::types::Value::Real(*f),
        Value::Decimal(d) => rusqlite::types::Value::Text(d.clone()),
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Bytes(b) => rusqlite::types::Value::Blob(b.clone()),
    }
}

fn rusqlite_to_value(row: &rusqlite::Row<'_>, idx: usize) -> Result<Value> {
    use rusqlite::types::ValueRef;

    let value_ref = row
        .get_ref(idx)
        .map_err(|e| FerryError::Query(e.to_string()))?;

    Ok(match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    })
}
