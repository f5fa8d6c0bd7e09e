//! Lazy, forward-only row production
//!
//! Dump readers parse on a blocking thread and push one row at a time into a
//! bounded channel; the copy loop pulls rows with [`RowStream::next`]. Only
//! `ROW_CHANNEL_CAPACITY` rows are ever buffered.

use ferry_core::Value;
use ferry_driver_sqlite::RowCursor;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ImportError;

pub const ROW_CHANNEL_CAPACITY: usize = 256;

/// One item read from a source table
#[derive(Debug, Clone, PartialEq)]
pub enum RowEvent {
    /// Values in table column order
    Row(Vec<Value>),
    /// A source row whose field count does not fit its column list
    Malformed {
        line: u64,
        found: usize,
        expected: usize,
    },
}

type Item = Result<RowEvent, ImportError>;

/// Producer side handed to a blocking parser
pub struct RowSink {
    sender: mpsc::Sender<Item>,
}

impl RowSink {
    /// Push a row; `false` once the consumer has gone away
    pub fn send(&self, row: Vec<Value>) -> bool {
        self.sender.blocking_send(Ok(RowEvent::Row(row))).is_ok()
    }

    pub fn malformed(&self, line: u64, found: usize, expected: usize) -> bool {
        self.sender
            .blocking_send(Ok(RowEvent::Malformed {
                line,
                found,
                expected,
            }))
            .is_ok()
    }
}

enum Source {
    Channel {
        receiver: mpsc::Receiver<Item>,
        producer: JoinHandle<()>,
    },
    Cursor(RowCursor),
}

pub struct RowStream {
    source: Source,
}

impl RowStream {
    /// Run `produce` on a blocking thread, streaming what it sends.
    ///
    /// An error returned by `produce` becomes the last item of the stream.
    pub fn spawn<F>(produce: F) -> Self
    where
        F: FnOnce(&RowSink) -> Result<(), ImportError> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(ROW_CHANNEL_CAPACITY);
        let producer = tokio::task::spawn_blocking(move || {
            let sink = RowSink { sender };
            if let Err(e) = produce(&sink) {
                let _ = sink.sender.blocking_send(Err(e));
            }
        });
        Self {
            source: Source::Channel { receiver, producer },
        }
    }

    pub fn from_cursor(cursor: RowCursor) -> Self {
        Self {
            source: Source::Cursor(cursor),
        }
    }

    pub async fn next(&mut self) -> Option<Item> {
        match &mut self.source {
            Source::Channel { receiver, .. } => receiver.recv().await,
            Source::Cursor(cursor) => cursor
                .next()
                .await
                .map(|row| row.map(RowEvent::Row).map_err(ImportError::from)),
        }
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        if let Source::Channel { receiver, producer } = &mut self.source {
            receiver.close();
            producer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn streams_rows_then_the_producer_error() {
        let mut stream = RowStream::spawn(|sink| {
            for i in 0..3 {
                sink.send(vec![Value::Int64(i)]);
            }
            sink.malformed(4, 1, 2);
            Err(ImportError::parse("dump.sql", 9, "unterminated string"))
        });

        let mut rows = Vec::new();
        let mut malformed = 0;
        let mut error = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(RowEvent::Row(row)) => rows.push(row),
                Ok(RowEvent::Malformed { .. }) => malformed += 1,
                Err(e) => error = Some(e),
            }
        }
        assert_eq!(rows.len(), 3);
        assert_eq!(malformed, 1);
        assert!(matches!(error, Some(ImportError::Parse { line: 9, .. })));
    }

    #[tokio::test]
    async fn producer_stops_when_the_stream_is_dropped() {
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let mut stream = RowStream::spawn(move |sink| {
            let mut sent = 0u64;
            while sink.send(vec![Value::Int64(sent as i64)]) {
                sent += 1;
            }
            let _ = done_tx.send(sent);
            Ok(())
        });
        assert!(stream.next().await.is_some());
        drop(stream);

        let sent = tokio::task::spawn_blocking(move || done_rx.recv().unwrap())
            .await
            .unwrap();
        assert!(sent < 10_000);
    }
}
