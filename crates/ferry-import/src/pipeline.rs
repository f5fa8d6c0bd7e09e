//! The import pipeline: analyze, create schema, copy data, create indexes
//!
//! One run owns its destination connection. Phases run strictly in order and
//! the first fatal error ends the run with whatever the report holds so far.
//! Rows are copied in batches; each committed batch stays in the destination
//! even if a later batch fails or the run is cancelled.

use ferry_core::{Connection, Transaction, Value};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::destination::{DestinationDialect, get_destination_dialect};
use crate::dialects::SourceReader;
use crate::naming::IdentifierCase;
use crate::options::GenericImportOptions;
use crate::plan::{ImportPlan, TablePlan, build_plan};
use crate::progress::{ImportPhase, ImportProgressCallback, PROGRESS_ROW_INTERVAL, ProgressReporter};
use crate::report::ImportReport;
use crate::row_stream::{RowEvent, RowStream};
use crate::value_coercion::coerce_value;
use crate::{ImportError, ImportFailure};

/// Skipped-row warnings recorded per table before they are summarized
pub const MAX_ROW_WARNINGS_PER_TABLE: u64 = 100;

/// Read the source schema and turn it into a plan; never touches a destination
#[tracing::instrument(skip_all, fields(path = %reader.path().display(), format = %reader.format()))]
pub async fn plan_source(
    reader: &dyn SourceReader,
    case: IdentifierCase,
) -> Result<ImportPlan, ImportError> {
    let schema = reader.read_schema().await?;
    tracing::info!(
        tables = schema.tables.len(),
        warnings = schema.warnings.len(),
        "source schema read"
    );
    build_plan(schema, reader.format(), case)
}

/// Plan the source, then run every phase against `conn`
///
/// The returned failure carries the partial report: tables created, rows
/// committed and warnings gathered before the run stopped.
#[tracing::instrument(
    skip_all,
    fields(source = %reader.path().display(), destination = %options.destination_path.display())
)]
pub async fn run_import(
    reader: &dyn SourceReader,
    conn: &dyn Connection,
    options: &GenericImportOptions,
    progress: Option<&ImportProgressCallback>,
    cancel: &CancellationToken,
) -> Result<ImportReport, ImportFailure> {
    let mut session = ImportSession::new(reader, options, progress, cancel);
    let plan = session.analyze().await?;
    session.execute(&plan, conn).await
}

/// One import run, split where the destination gets opened
///
/// [`ImportSession::analyze`] reads only the source, so a caller can decide
/// whether to replace or create the destination after planning succeeded.
/// [`ImportSession::execute`] then runs the mutating phases.
pub struct ImportSession<'a> {
    reader: &'a dyn SourceReader,
    options: &'a GenericImportOptions,
    cancel: &'a CancellationToken,
    progress: ProgressReporter<'a>,
    report: ImportReport,
    started: Instant,
}

impl<'a> ImportSession<'a> {
    pub fn new(
        reader: &'a dyn SourceReader,
        options: &'a GenericImportOptions,
        progress: Option<&'a ImportProgressCallback>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            reader,
            options,
            cancel,
            progress: ProgressReporter::new(progress),
            report: ImportReport {
                source_path: options.source_path.clone(),
                destination_path: options.destination_path.clone(),
                format: Some(reader.format()),
                ..Default::default()
            },
            started: Instant::now(),
        }
    }

    /// Read the source schema and plan the run
    pub async fn analyze(&mut self) -> Result<ImportPlan, ImportFailure> {
        self.progress.phase(
            ImportPhase::Analyzing,
            format!("Analyzing {}", self.reader.path().display()),
        );
        let planned = self.plan().await;
        match planned {
            Ok(plan) => {
                self.record_plan(&plan);
                Ok(plan)
            }
            Err(error) => Err(self.failed(error)),
        }
    }

    async fn plan(&self) -> Result<ImportPlan, ImportError> {
        check_cancelled(self.cancel)?;
        let case = IdentifierCase::from_lowercase_flag(self.options.lowercase_identifiers);
        plan_source(self.reader, case).await
    }

    fn record_plan(&mut self, plan: &ImportPlan) {
        self.report.skipped_indexes = plan.skipped_indexes.clone();
        self.report.warnings.extend(plan.warnings.iter().cloned());
        self.progress
            .set_totals(plan.tables.len(), plan.total_rows(), plan.indexes.len());
        self.progress.emit(format!(
            "Found {} tables, {} rows",
            plan.tables.len(),
            plan.total_rows()
        ));
    }

    /// Create tables, copy rows and create indexes in `conn`
    pub async fn execute(
        mut self,
        plan: &ImportPlan,
        conn: &dyn Connection,
    ) -> Result<ImportReport, ImportFailure> {
        let destination = get_destination_dialect(conn.driver_name());
        tracing::debug!(
            driver = conn.driver_name(),
            dialect = destination.name(),
            "destination dialect selected"
        );
        let outcome = Pipeline {
            conn,
            destination: destination.as_ref(),
            options: self.options,
            cancel: self.cancel,
            progress: &mut self.progress,
            report: &mut self.report,
        }
        .run(self.reader, plan)
        .await;

        match outcome {
            Ok(()) => Ok(self.completed()),
            Err(error) => Err(self.failed(error)),
        }
    }

    /// End the run before the destination was touched
    pub fn abort(mut self, error: ImportError) -> ImportFailure {
        self.failed(error)
    }

    fn completed(&mut self) -> ImportReport {
        self.report.elapsed = self.started.elapsed();
        tracing::info!(
            tables = self.report.tables.len(),
            rows = self.report.total_rows(),
            indexes = self.report.indexes_created.len(),
            elapsed_ms = self.report.elapsed.as_millis() as u64,
            "import complete"
        );
        let message = format!(
            "Imported {} tables, {} rows",
            self.report.tables.len(),
            self.report.total_rows()
        );
        self.progress.phase(ImportPhase::Complete, message);
        std::mem::take(&mut self.report)
    }

    fn failed(&mut self, error: ImportError) -> ImportFailure {
        self.report.elapsed = self.started.elapsed();
        let phase = if error.is_cancelled() {
            tracing::info!(rows = self.report.total_rows(), "import cancelled");
            ImportPhase::Cancelled
        } else {
            tracing::error!(error = %error, "import failed");
            ImportPhase::Failed
        };
        self.progress.phase(phase, error.to_string());
        ImportFailure::new(error, std::mem::take(&mut self.report))
    }
}

/// The mutating phases, borrowing the session's report and progress
struct Pipeline<'p, 'a> {
    conn: &'p dyn Connection,
    destination: &'p dyn DestinationDialect,
    options: &'p GenericImportOptions,
    cancel: &'p CancellationToken,
    progress: &'p mut ProgressReporter<'a>,
    report: &'p mut ImportReport,
}

/// Row accounting for the table being copied
#[derive(Debug, Default)]
struct TableCopy {
    committed: u64,
    pending: u64,
    skipped: u64,
}

impl TableCopy {
    fn copied(&self) -> u64 {
        self.committed + self.pending
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), ImportError> {
    if cancel.is_cancelled() {
        Err(ImportError::Cancelled)
    } else {
        Ok(())
    }
}

impl Pipeline<'_, '_> {
    async fn run(&mut self, reader: &dyn SourceReader, plan: &ImportPlan) -> Result<(), ImportError> {
        self.create_schema(plan).await?;
        self.copy_data(reader, plan).await?;
        self.create_indexes(plan).await?;
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), ImportError> {
        check_cancelled(self.cancel)
    }

    async fn create_schema(&mut self, plan: &ImportPlan) -> Result<(), ImportError> {
        self.progress.phase(
            ImportPhase::CreatingSchema,
            format!("Creating {} tables", plan.tables.len()),
        );
        let tx = self.conn.begin_transaction().await?;
        let result = self.create_tables(tx.as_ref(), plan).await;
        finish(tx, result).await
    }

    async fn create_tables(
        &mut self,
        tx: &dyn Transaction,
        plan: &ImportPlan,
    ) -> Result<(), ImportError> {
        for table in &plan.tables {
            self.check_cancelled()?;
            let sql = table.spec.create_sql(self.destination);
            tracing::debug!(table = %table.dest_name(), sql = %sql, "creating table");
            tx.execute(&sql, &[]).await?;
            self.report.tables.push(table.source_name().to_string());
            self.report
                .table_mappings
                .insert(table.source_name().to_string(), table.dest_name().to_string());
            self.progress
                .table(table.dest_name(), format!("Created table {}", table.dest_name()));
        }
        Ok(())
    }

    async fn copy_data(
        &mut self,
        reader: &dyn SourceReader,
        plan: &ImportPlan,
    ) -> Result<(), ImportError> {
        self.progress.phase(
            ImportPhase::CopyingData,
            format!("Copying {} rows", plan.total_rows()),
        );
        for table in &plan.tables {
            self.check_cancelled()?;
            self.copy_table(reader, plan, table).await?;
            self.progress.table_done();
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(table = %table.source_name()))]
    async fn copy_table(
        &mut self,
        reader: &dyn SourceReader,
        plan: &ImportPlan,
        table: &TablePlan,
    ) -> Result<(), ImportError> {
        self.report
            .rows_copied
            .insert(table.source_name().to_string(), 0);
        self.progress
            .table(table.dest_name(), format!("Copying {}", table.dest_name()));

        let mut stream = reader.open_rows(&plan.schema, &table.source)?;
        let mut slot: Option<Box<dyn Transaction>> = None;
        let mut counts = TableCopy::default();
        let result = self
            .copy_rows(&mut stream, table, &mut slot, &mut counts)
            .await;

        match result {
            Ok(()) => {
                if let Some(tx) = slot.take() {
                    tx.commit().await?;
                }
                self.commit_pending(table, &mut counts);
            }
            Err(e) => {
                if let Some(tx) = slot.take() {
                    rollback_quietly(tx).await;
                }
                tracing::debug!(
                    committed = counts.committed,
                    discarded = counts.pending,
                    "table copy stopped"
                );
                return Err(e);
            }
        }

        if counts.skipped > MAX_ROW_WARNINGS_PER_TABLE {
            self.report.warn(format!(
                "{} more malformed rows skipped in {}",
                counts.skipped - MAX_ROW_WARNINGS_PER_TABLE,
                table.source_name()
            ));
        }
        if counts.copied() != table.row_count {
            tracing::debug!(
                expected = table.row_count,
                copied = counts.copied(),
                skipped = counts.skipped,
                "copied row count differs from analysis"
            );
        }
        tracing::info!(rows = counts.committed, skipped = counts.skipped, "table copied");
        self.progress.table(
            table.dest_name(),
            format!("Copied {} rows into {}", counts.committed, table.dest_name()),
        );
        Ok(())
    }

    async fn copy_rows(
        &mut self,
        stream: &mut RowStream,
        table: &TablePlan,
        slot: &mut Option<Box<dyn Transaction>>,
        counts: &mut TableCopy,
    ) -> Result<(), ImportError> {
        let insert_sql = table.spec.insert_sql(self.destination);
        let types = table.column_types();
        let width = table.column_count();
        let batch_limit = self.options.batch_limit();

        loop {
            self.check_cancelled()?;
            let Some(item) = stream.next().await else {
                break;
            };
            let row = match item? {
                RowEvent::Row(row) if row.len() == width => row,
                RowEvent::Row(row) => {
                    self.skip_row(table, None, row.len(), width, counts);
                    continue;
                }
                RowEvent::Malformed {
                    line,
                    found,
                    expected,
                } => {
                    self.skip_row(table, Some(line), found, expected, counts);
                    continue;
                }
            };

            let params: Vec<Value> = row
                .into_iter()
                .zip(&types)
                .map(|(value, ty)| coerce_value(value, ty))
                .collect();
            if slot.is_none() {
                *slot = Some(self.conn.begin_transaction().await?);
            }
            if let Some(tx) = slot.as_deref() {
                tx.execute(&insert_sql, &params).await?;
            }
            counts.pending += 1;
            self.progress.rows(1);

            let copied = counts.copied();
            if copied % PROGRESS_ROW_INTERVAL == 0 || copied == table.row_count {
                self.progress.table(
                    table.dest_name(),
                    format!("{}: {} of {} rows", table.dest_name(), copied, table.row_count),
                );
            }

            if batch_limit.is_some_and(|limit| counts.pending >= limit) {
                if let Some(tx) = slot.take() {
                    tx.commit().await?;
                }
                self.commit_pending(table, counts);
            }
        }
        Ok(())
    }

    fn commit_pending(&mut self, table: &TablePlan, counts: &mut TableCopy) {
        if counts.pending == 0 {
            return;
        }
        counts.committed += counts.pending;
        counts.pending = 0;
        tracing::debug!(committed = counts.committed, "batch committed");
        self.report
            .rows_copied
            .insert(table.source_name().to_string(), counts.committed);
    }

    fn skip_row(
        &mut self,
        table: &TablePlan,
        line: Option<u64>,
        found: usize,
        expected: usize,
        counts: &mut TableCopy,
    ) {
        counts.skipped += 1;
        if counts.skipped > MAX_ROW_WARNINGS_PER_TABLE {
            return;
        }
        let at = line.map(|l| format!(" at line {}", l)).unwrap_or_default();
        self.report.warn(format!(
            "Skipped row{} in {}: expected {} fields, found {}",
            at,
            table.source_name(),
            expected,
            found
        ));
    }

    async fn create_indexes(&mut self, plan: &ImportPlan) -> Result<(), ImportError> {
        self.progress.phase(
            ImportPhase::CreatingIndexes,
            format!("Creating {} indexes", plan.indexes.len()),
        );
        if plan.indexes.is_empty() {
            return Ok(());
        }
        let tx = self.conn.begin_transaction().await?;
        let result = self.create_index_statements(tx.as_ref(), plan).await;
        finish(tx, result).await
    }

    async fn create_index_statements(
        &mut self,
        tx: &dyn Transaction,
        plan: &ImportPlan,
    ) -> Result<(), ImportError> {
        for index in &plan.indexes {
            self.check_cancelled()?;
            tracing::debug!(index = %index.dest_name, sql = %index.sql, "creating index");
            tx.execute(&index.sql, &[]).await?;
            self.report.indexes_created.push(index.dest_name.clone());
            if index.unique {
                self.report
                    .unique_columns_added
                    .push(format!("{}.{}", index.dest_table, index.dest_column));
            }
            self.progress.index_done();
            self.progress
                .table(&index.dest_table, format!("Created index {}", index.dest_name));
        }
        Ok(())
    }
}

/// Commit on success, roll back on failure
async fn finish(tx: Box<dyn Transaction>, result: Result<(), ImportError>) -> Result<(), ImportError> {
    match result {
        Ok(()) => Ok(tx.commit().await?),
        Err(e) => {
            rollback_quietly(tx).await;
            Err(e)
        }
    }
}

async fn rollback_quietly(tx: Box<dyn Transaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "rollback failed");
    }
}
