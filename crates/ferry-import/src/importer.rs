//! Top-level analyze and import entry points
//!
//! A source path is decompressed (if needed), classified, and paired with
//! the reader for its format. Extraction directories are removed exactly
//! once when the call returns, whether it succeeded or not.

use async_trait::async_trait;
use ferry_core::DatabaseDriver;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::decompress::{ExtractedSource, cleanup_temp_dir, decompress};
use crate::dialects::{
    MySqlDumpReader, MySqlShellReader, PostgresDumpReader, SourceReader, SqliteReader,
    run_blocking,
};
use crate::format::{detect_format, resolve_dump_path};
use crate::naming::IdentifierCase;
use crate::options::GenericImportOptions;
use crate::pipeline::{ImportSession, plan_source};
use crate::progress::ImportProgressCallback;
use crate::report::{GenericAnalysisResult, ImportReport};
use crate::{ImportError, ImportFailure, SourceFormat};

/// The two operations every source format supports
#[async_trait]
pub trait Importer: Send + Sync {
    /// Read-only inspection of the source
    async fn analyze(&self, case: IdentifierCase) -> Result<GenericAnalysisResult, ImportError>;

    /// Start a run; nothing is read until [`ImportSession::analyze`]
    fn session<'a>(
        &'a self,
        options: &'a GenericImportOptions,
        progress: Option<&'a ImportProgressCallback>,
        cancel: &'a CancellationToken,
    ) -> ImportSession<'a>;
}

/// A reader selected by source format
pub enum SourceImporter {
    Sqlite(SqliteReader),
    PostgresDump(PostgresDumpReader),
    MySqlDump(MySqlDumpReader),
    MySqlShellDump(MySqlShellReader),
}

impl SourceImporter {
    pub fn open(path: &Path, format: SourceFormat) -> Result<Self, ImportError> {
        Ok(match format {
            SourceFormat::Sqlite => SourceImporter::Sqlite(SqliteReader::open(path)?),
            SourceFormat::PostgresDump => SourceImporter::PostgresDump(PostgresDumpReader::new(path)),
            SourceFormat::MySqlDump => SourceImporter::MySqlDump(MySqlDumpReader::new(path)),
            SourceFormat::MySqlShellDump => SourceImporter::MySqlShellDump(MySqlShellReader::new(path)),
            SourceFormat::Unknown => return Err(ImportError::UnknownFormat(path.to_path_buf())),
        })
    }

    pub fn reader(&self) -> &dyn SourceReader {
        match self {
            SourceImporter::Sqlite(reader) => reader,
            SourceImporter::PostgresDump(reader) => reader,
            SourceImporter::MySqlDump(reader) => reader,
            SourceImporter::MySqlShellDump(reader) => reader,
        }
    }

    pub fn format(&self) -> SourceFormat {
        self.reader().format()
    }
}

#[async_trait]
impl Importer for SourceImporter {
    async fn analyze(&self, case: IdentifierCase) -> Result<GenericAnalysisResult, ImportError> {
        let reader = self.reader();
        let plan = plan_source(reader, case).await?;
        Ok(plan.analysis(reader.path()))
    }

    fn session<'a>(
        &'a self,
        options: &'a GenericImportOptions,
        progress: Option<&'a ImportProgressCallback>,
        cancel: &'a CancellationToken,
    ) -> ImportSession<'a> {
        ImportSession::new(self.reader(), options, progress, cancel)
    }
}

/// Removes an extraction directory when dropped
struct TempDirGuard(Option<PathBuf>);

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        if let Some(dir) = self.0.take() {
            cleanup_temp_dir(&dir);
        }
    }
}

/// A source ready to read, with its extraction directory held until drop
struct PreparedSource {
    importer: SourceImporter,
    _temp: TempDirGuard,
}

async fn prepare_source(options: &GenericImportOptions) -> Result<PreparedSource, ImportError> {
    let source = options.source_path.clone();
    if !source.exists() {
        return Err(ImportError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("source {} does not exist", source.display()),
        )));
    }
    let work_dir = options.working_directory.clone();
    let ExtractedSource { path, temp_dir } =
        run_blocking(move || decompress(&source, work_dir.as_deref())).await?;
    let temp = TempDirGuard(temp_dir);

    let format = match options.format {
        Some(format) => format,
        None => {
            let detect_path = path.clone();
            run_blocking(move || Ok(detect_format(&detect_path))).await?
        }
    };
    if format == SourceFormat::Unknown {
        return Err(ImportError::UnknownFormat(options.source_path.clone()));
    }
    let path = resolve_dump_path(&path, format);
    tracing::info!(format = %format, path = %path.display(), "source prepared");

    Ok(PreparedSource {
        importer: SourceImporter::open(&path, format)?,
        _temp: temp,
    })
}

/// Classify a source without reading its schema
pub async fn detect_source(
    path: &Path,
    working_directory: Option<&Path>,
) -> Result<SourceFormat, ImportError> {
    let source = path.to_path_buf();
    let work_dir = working_directory.map(Path::to_path_buf);
    let ExtractedSource { path, temp_dir } =
        run_blocking(move || decompress(&source, work_dir.as_deref())).await?;
    let _temp = TempDirGuard(temp_dir);
    run_blocking(move || Ok(detect_format(&path))).await
}

/// Analyze the source named by `options`; the destination is never opened
#[tracing::instrument(skip_all, fields(source = %options.source_path.display()))]
pub async fn analyze_source(
    options: &GenericImportOptions,
) -> Result<GenericAnalysisResult, ImportError> {
    let prepared = prepare_source(options).await?;
    let case = IdentifierCase::from_lowercase_flag(options.lowercase_identifiers);
    let mut analysis = prepared.importer.analyze(case).await?;
    analysis.source_path = options.source_path.clone();
    Ok(analysis)
}

/// Import the source named by `options` into a destination opened by `driver`
#[tracing::instrument(
    skip_all,
    fields(source = %options.source_path.display(), destination = %options.destination_path.display())
)]
pub async fn import_source(
    options: &GenericImportOptions,
    driver: &dyn DatabaseDriver,
    progress: Option<&ImportProgressCallback>,
    cancel: &CancellationToken,
) -> Result<ImportReport, ImportFailure> {
    let fail = |error: ImportError| {
        ImportFailure::new(
            error,
            ImportReport {
                source_path: options.source_path.clone(),
                destination_path: options.destination_path.clone(),
                format: options.format,
                ..Default::default()
            },
        )
    };
    let destination = options.destination_path.as_path();
    if destination.exists() && !options.overwrite {
        return Err(fail(ImportError::DestinationExists(destination.to_path_buf())));
    }

    let prepared = prepare_source(options).await.map_err(fail)?;
    let mut session = prepared.importer.session(options, progress, cancel);
    let plan = session.analyze().await?;
    if cancel.is_cancelled() {
        return Err(session.abort(ImportError::Cancelled));
    }

    if options.overwrite {
        if let Err(e) = remove_destination(driver, destination) {
            return Err(session.abort(e));
        }
    }
    let conn = match driver.connect(destination).await {
        Ok(conn) => conn,
        Err(e) => return Err(session.abort(e.into())),
    };
    tracing::info!(driver = driver.name(), "destination opened");

    let result = session.execute(&plan, conn.as_ref()).await;
    if let Err(e) = conn.close().await {
        tracing::warn!(error = %e, "failed to close destination");
    }
    drop(conn);

    if let Err(failure) = &result {
        if failure.partial.tables.is_empty() {
            tracing::debug!("no tables were created; removing the destination");
            if let Err(e) = remove_destination(driver, destination) {
                tracing::warn!(error = %e, "failed to remove untouched destination");
            }
        }
    }
    result
}

/// Delete the destination file and its journal siblings; missing files are fine
fn remove_destination(driver: &dyn DatabaseDriver, path: &Path) -> Result<(), ImportError> {
    let mut files = vec![path.to_path_buf()];
    files.extend(driver.companion_files(path));
    for file in files {
        match fs::remove_file(&file) {
            Ok(()) => tracing::debug!(file = %file.display(), "removed destination file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_driver_sqlite::SqliteDriver;
    use std::io::Write;

    #[test]
    fn unknown_format_has_no_importer() {
        let err = SourceImporter::open(Path::new("x.bin"), SourceFormat::Unknown)
            .err()
            .unwrap();
        assert!(matches!(err, ImportError::UnknownFormat(_)));
    }

    #[tokio::test]
    async fn existing_destination_requires_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("dump.sql");
        fs::write(&source, "-- MySQL dump 10.13\nCREATE TABLE `t` (`id` int);\n").unwrap();
        let dest = dir.path().join("out.db");
        fs::write(&dest, b"keep me").unwrap();

        let options = GenericImportOptions::new(&source, &dest);
        let failure = import_source(&options, &SqliteDriver::new(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ImportError::DestinationExists(_)));
        assert_eq!(fs::read(&dest).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn overwrite_replaces_destination_and_companions() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("dump.sql");
        fs::write(
            &source,
            "-- MySQL dump 10.13\nCREATE TABLE `t` (`id` int);\nINSERT INTO `t` VALUES (1),(2);\n",
        )
        .unwrap();
        let dest = dir.path().join("out.db");
        fs::write(&dest, b"not a database").unwrap();
        let journal = dir.path().join("out.db-journal");
        fs::write(&journal, b"stale").unwrap();

        let options = GenericImportOptions::new(&source, &dest).with_overwrite(true);
        let report = import_source(&options, &SqliteDriver::new(), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.rows_copied["t"], 2);
        assert!(!journal.exists());
    }

    #[tokio::test]
    async fn undetectable_sources_fail_before_the_destination_exists() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("notes.txt");
        let mut file = fs::File::create(&source).unwrap();
        writeln!(file, "just some notes").unwrap();
        let dest = dir.path().join("out.db");

        let options = GenericImportOptions::new(&source, &dest);
        let failure = import_source(&options, &SqliteDriver::new(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ImportError::UnknownFormat(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn failed_planning_leaves_no_destination_behind() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("dump.sql");
        fs::write(
            &source,
            "-- MySQL dump 10.13\nCREATE TABLE `Orders` (`id` int);\nCREATE TABLE `orders` (`id` int);\n",
        )
        .unwrap();
        let dest = dir.path().join("out.db");

        let options = GenericImportOptions::new(&source, &dest);
        let failure = import_source(&options, &SqliteDriver::new(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ImportError::IdentifierCollision { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn overwrite_waits_for_a_successful_plan() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("dump.sql");
        fs::write(
            &source,
            "-- MySQL dump 10.13\nCREATE TABLE `a` (`id` int, CONSTRAINT `fk` FOREIGN KEY (`id`) REFERENCES `gone` (`id`));\n",
        )
        .unwrap();
        let dest = dir.path().join("out.db");
        fs::write(&dest, b"keep me").unwrap();

        let options = GenericImportOptions::new(&source, &dest).with_overwrite(true);
        let failure = import_source(&options, &SqliteDriver::new(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ImportError::MissingReferencedTable { .. }));
        assert_eq!(fs::read(&dest).unwrap(), b"keep me");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let failure = import_source(&options, &SqliteDriver::new(), None, &cancel)
            .await
            .unwrap_err();
        assert!(failure.is_cancelled());
        assert_eq!(fs::read(&dest).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn analysis_reports_the_original_path() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("dump.sql");
        fs::write(
            &source,
            "-- MySQL dump 10.13\nCREATE TABLE `t` (`id` int);\nINSERT INTO `t` VALUES (1);\n",
        )
        .unwrap();
        let analysis = analyze_source(&GenericImportOptions::new(&source, "unused.db"))
            .await
            .unwrap();
        assert_eq!(analysis.source_path, source);
        assert_eq!(analysis.format, SourceFormat::MySqlDump);
        assert_eq!(analysis.row_counts["t"], 1);
    }
}
