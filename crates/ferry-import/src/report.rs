//! Analysis results and import reports

use indexmap::IndexMap;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::SourceFormat;

/// An index the import chose not to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedIndex {
    pub index: String,
    pub table: String,
    pub reason: String,
}

/// Read-only outcome of analyzing a source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenericAnalysisResult {
    pub source_path: PathBuf,
    pub format: SourceFormat,
    /// Source table names in dependency order
    pub table_names: Vec<String>,
    pub row_counts: IndexMap<String, u64>,
    pub skipped_indexes: Vec<SkippedIndex>,
    pub warnings: Vec<String>,
}

impl GenericAnalysisResult {
    pub fn total_rows(&self) -> u64 {
        self.row_counts.values().sum()
    }
}

/// What an import run did
///
/// Tables and row counts are keyed by source table name; `table_mappings`
/// gives the destination name of each.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub format: Option<SourceFormat>,
    /// Tables created, in creation order
    pub tables: Vec<String>,
    pub table_mappings: IndexMap<String, String>,
    pub rows_copied: IndexMap<String, u64>,
    /// Destination index names
    pub indexes_created: Vec<String>,
    /// `table.column` for every unique index created
    pub unique_columns_added: Vec<String>,
    pub skipped_indexes: Vec<SkippedIndex>,
    pub warnings: Vec<String>,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl ImportReport {
    pub fn total_rows(&self) -> u64 {
        self.rows_copied.values().sum()
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(warning = %message, "import warning");
        self.warnings.push(message);
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().min(u128::from(u64::MAX)) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_serializes_elapsed_as_millis() {
        let mut report = ImportReport::default();
        report.rows_copied.insert("users".into(), 3);
        report.rows_copied.insert("posts".into(), 4);
        report.elapsed = Duration::from_millis(1500);

        assert_eq!(report.total_rows(), 7);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["elapsed"], 1500);
        assert_eq!(json["rows_copied"]["posts"], 4);
    }
}
