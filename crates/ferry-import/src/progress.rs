//! Import progress events

use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Rows copied between two progress events for the same table
pub const PROGRESS_ROW_INTERVAL: u64 = 200;

/// Progress callback for import operations
pub type ImportProgressCallback = Box<dyn Fn(ImportProgress) + Send + Sync>;

/// Phases of the import process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    /// Reading the source schema and planning the run
    Analyzing,
    /// Creating tables
    CreatingSchema,
    /// Copying rows
    CopyingData,
    /// Creating indexes
    CreatingIndexes,
    /// Complete
    Complete,
    Failed,
    Cancelled,
}

impl ImportPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportPhase::Complete | ImportPhase::Failed | ImportPhase::Cancelled
        )
    }
}

/// Import progress information
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportProgress {
    pub phase: ImportPhase,
    /// Current table being imported
    pub current_table: Option<String>,
    /// Rows processed so far across all tables
    pub rows_completed: u64,
    /// Rows counted during analysis across all tables
    pub rows_total: u64,
    pub tables_completed: usize,
    pub tables_total: usize,
    pub indexes_completed: usize,
    pub indexes_total: usize,
    pub message: String,
}

/// Builds progress snapshots and hands them to the optional callback.
///
/// A panicking callback is caught and logged so reporting can never abort
/// an import.
pub(crate) struct ProgressReporter<'a> {
    callback: Option<&'a ImportProgressCallback>,
    state: ImportProgress,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(callback: Option<&'a ImportProgressCallback>) -> Self {
        Self {
            callback,
            state: ImportProgress {
                phase: ImportPhase::Analyzing,
                current_table: None,
                rows_completed: 0,
                rows_total: 0,
                tables_completed: 0,
                tables_total: 0,
                indexes_completed: 0,
                indexes_total: 0,
                message: String::new(),
            },
        }
    }

    pub fn set_totals(&mut self, tables: usize, rows: u64, indexes: usize) {
        self.state.tables_total = tables;
        self.state.rows_total = rows;
        self.state.indexes_total = indexes;
    }

    pub fn phase(&mut self, phase: ImportPhase, message: impl Into<String>) {
        self.state.phase = phase;
        self.state.current_table = None;
        self.emit(message);
    }

    pub fn table(&mut self, table: &str, message: impl Into<String>) {
        self.state.current_table = Some(table.to_string());
        self.emit(message);
    }

    pub fn rows(&mut self, delta: u64) {
        self.state.rows_completed += delta;
    }

    pub fn table_done(&mut self) {
        self.state.tables_completed += 1;
    }

    pub fn index_done(&mut self) {
        self.state.indexes_completed += 1;
    }

    pub fn emit(&mut self, message: impl Into<String>) {
        self.state.message = message.into();
        let Some(callback) = self.callback else {
            return;
        };
        let snapshot = self.state.clone();
        if catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
            tracing::warn!(phase = ?self.state.phase, "progress callback panicked; ignoring");
        }
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> &ImportProgress {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn reporter_without_callback_is_silent() {
        let mut reporter = ProgressReporter::new(None);
        reporter.phase(ImportPhase::CopyingData, "copying");
        reporter.rows(10);
        assert_eq!(reporter.snapshot().rows_completed, 10);
    }

    #[test]
    fn events_carry_running_totals() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ImportProgressCallback =
            Box::new(move |p: ImportProgress| sink.lock().unwrap().push(p));

        let mut reporter = ProgressReporter::new(Some(&callback));
        reporter.set_totals(2, 300, 1);
        reporter.phase(ImportPhase::CopyingData, "copying");
        reporter.rows(200);
        reporter.table("users", "users: 200 rows");
        reporter.table_done();
        reporter.phase(ImportPhase::Complete, "done");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1].current_table.as_deref(), Some("users"));
        assert_eq!(seen[1].rows_completed, 200);
        assert_eq!(seen[1].rows_total, 300);
        assert_eq!(seen[2].tables_completed, 1);
        assert!(seen[2].phase.is_terminal());
    }

    #[test]
    fn panicking_callback_does_not_propagate() {
        let callback: ImportProgressCallback = Box::new(|_| panic!("ui went away"));
        let mut reporter = ProgressReporter::new(Some(&callback));
        reporter.phase(ImportPhase::CreatingSchema, "creating");
        reporter.emit("still alive");
        assert_eq!(reporter.snapshot().message, "still alive");
    }
}
