//! Forward-only row cursor over a SQLite query
//!
//! `Connection::query` materializes every row, which is fine for catalog
//! lookups but not for copying a multi-gigabyte table. A `RowCursor` steps the
//! statement on a blocking thread and hands rows over a bounded channel, so at
//! most `capacity` rows are buffered at any time.

use ferry_core::{FerryError, Result, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::SqliteConnection;
use crate::connection::row_values;

/// Lazily produced rows of one query
pub struct RowCursor {
    receiver: mpsc::Receiver<Result<Vec<Value>>>,
    producer: JoinHandle<()>,
}

impl RowCursor {
    /// Next row, or `None` once the query is exhausted
    pub async fn next(&mut self) -> Option<Result<Vec<Value>>> {
        self.receiver.recv().await
    }
}

impl Drop for RowCursor {
    fn drop(&mut self) {
        // The producer stops at its next send once the receiver is closed;
        // abort only prevents a producer that has not started yet.
        self.receiver.close();
        self.producer.abort();
    }
}

impl SqliteConnection {
    /// Run `sql` and stream its rows through a bounded channel
    pub fn stream_rows(&self, sql: &str, capacity: usize) -> RowCursor {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();

        let producer = tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let mut stmt = match conn.prepare(&sql) {
                Ok(stmt) => stmt,
                Err(e) => {
                    let _ = sender.blocking_send(Err(FerryError::Query(format!(
                        "Failed to prepare query: {}",
                        e
                    ))));
                    return;
                }
            };
            let width = stmt.column_count();
            let mut rows = match stmt.query([]) {
                Ok(rows) => rows,
                Err(e) => {
                    let _ = sender.blocking_send(Err(FerryError::Query(format!(
                        "Failed to execute query: {}",
                        e
                    ))));
                    return;
                }
            };

            loop {
                let item = match rows.next() {
                    Ok(Some(row)) => row_values(row, width),
                    Ok(None) => break,
                    Err(e) => Err(FerryError::Query(format!("Failed to fetch row: {}", e))),
                };
                let failed = item.is_err();
                if sender.blocking_send(item).is_err() {
                    tracing::debug!("row cursor receiver dropped, stopping early");
                    break;
                }
                if failed {
                    break;
                }
            }
        });

        RowCursor { receiver, producer }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::Connection;

    #[tokio::test]
    async fn streams_rows_in_order() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER, name TEXT)", &[])
            .await
            .unwrap();
        for i in 0..10 {
            conn.execute(
                "INSERT INTO t VALUES (?, ?)",
                &[Value::Int64(i), Value::String(format!("n{}", i))],
            )
            .await
            .unwrap();
        }

        let mut cursor = conn.stream_rows("SELECT id, name FROM t ORDER BY id", 2);
        let mut seen = Vec::new();
        while let Some(row) = cursor.next().await {
            seen.push(row.unwrap());
        }
        assert_eq!(seen.len(), 10);
        assert_eq!(seen[3], vec![Value::Int64(3), Value::String("n3".into())]);
    }

    #[tokio::test]
    async fn reports_prepare_errors_through_the_stream() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        let mut cursor = conn.stream_rows("SELECT * FROM missing_table", 4);
        let first = cursor.next().await.unwrap();
        assert!(matches!(first, Err(FerryError::Query(_))));
        assert!(cursor.next().await.is_none());
    }
}
