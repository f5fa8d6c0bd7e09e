//! ferry - migrate SQLite databases and SQL dumps into a SQLite destination

mod logging;
mod output;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use ferry_driver_sqlite::SqliteDriver;
use ferry_import::{
    GenericImportOptions, ImportProgress, ImportProgressCallback, SourceFormat, analyze_source,
    detect_source, import_source,
};
use logging::LogFormat;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// Exit status for a run stopped by Ctrl-C
const EXIT_CANCELLED: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "ferry")]
#[command(about = "Import SQLite databases and SQL dumps into a SQLite database")]
#[command(version)]
struct Cli {
    /// Log format: text or json
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the detected format of a source
    Detect {
        path: PathBuf,

        /// Where compressed sources are extracted
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },

    /// Show tables, row counts and skipped indexes without importing
    Analyze {
        path: PathBuf,

        /// Read the source as this format instead of detecting it
        #[arg(long)]
        format: Option<SourceFormat>,

        /// Keep identifier case instead of folding to lowercase
        #[arg(long)]
        preserve_case: bool,

        /// Where compressed sources are extracted
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Import a source into a destination database
    Import(ImportArgs),
}

#[derive(Debug, Args)]
struct ImportArgs {
    source: PathBuf,
    destination: PathBuf,

    /// TOML run file; flags given here override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rows per transaction; 0 or less commits once per table
    #[arg(long, env = "FERRY_BATCH_SIZE", allow_negative_numbers = true)]
    batch_size: Option<i64>,

    /// Keep identifier case instead of folding to lowercase
    #[arg(long)]
    preserve_case: bool,

    /// Replace the destination if it already exists
    #[arg(long)]
    overwrite: bool,

    /// Where compressed sources are extracted
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Read the source as this format instead of detecting it
    #[arg(long)]
    format: Option<SourceFormat>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl ImportArgs {
    fn options(&self) -> anyhow::Result<GenericImportOptions> {
        let mut options = match &self.config {
            Some(path) => GenericImportOptions::from_toml_file(path)
                .with_context(|| format!("failed to load run file {}", path.display()))?,
            None => GenericImportOptions::default(),
        };
        options.source_path = self.source.clone();
        options.destination_path = self.destination.clone();
        if let Some(size) = self.batch_size {
            options.commit_batch_size = size;
        }
        if self.preserve_case {
            options.lowercase_identifiers = false;
        }
        if self.overwrite {
            options.overwrite = true;
        }
        if let Some(dir) = &self.work_dir {
            options.working_directory = Some(dir.clone());
        }
        if let Some(format) = self.format {
            options.format = Some(format);
        }
        Ok(options)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.log_format) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Detect { path, work_dir } => {
            let format = detect_source(&path, work_dir.as_deref())
                .await
                .with_context(|| format!("failed to inspect {}", path.display()))?;
            println!("{}", format);
            if format == SourceFormat::Unknown {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Analyze {
            path,
            format,
            preserve_case,
            work_dir,
            json,
        } => {
            let mut options = GenericImportOptions::new(&path, PathBuf::new())
                .with_lowercase_identifiers(!preserve_case);
            options.format = format;
            options.working_directory = work_dir;
            let analysis = analyze_source(&options)
                .await
                .with_context(|| format!("failed to analyze {}", path.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
            } else {
                print!("{}", output::analysis_text(&analysis));
            }
        }

        Commands::Import(args) => return import(args).await,
    }
    Ok(ExitCode::SUCCESS)
}

async fn import(args: ImportArgs) -> anyhow::Result<ExitCode> {
    let options = args.options()?;
    let cancel = cancel_on_ctrl_c();
    let progress: ImportProgressCallback = Box::new(log_progress);

    match import_source(&options, &SqliteDriver::new(), Some(&progress), &cancel).await {
        Ok(report) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", output::report_text(&report, "Import complete"));
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&failure.partial)?);
            } else {
                eprint!("{}", output::report_text(&failure.partial, "Import stopped"));
            }
            if failure.is_cancelled() {
                eprintln!("Import cancelled");
                return Ok(ExitCode::from(EXIT_CANCELLED));
            }
            Err(anyhow::Error::new(failure).context("import failed"))
        }
    }
}

fn log_progress(progress: ImportProgress) {
    tracing::info!(
        phase = ?progress.phase,
        table = progress.current_table.as_deref().unwrap_or(""),
        rows = progress.rows_completed,
        total_rows = progress.rows_total,
        "{}",
        progress.message
    );
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                eprintln!("\nReceived Ctrl-C. Stopping after the current row...");
                token.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "failed to listen for Ctrl-C"),
        }
    });
    cancel
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn import_args(argv: &[&str]) -> ImportArgs {
        let mut full = vec!["ferry", "import"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Import(args) => args,
            other => panic!("expected import, got {:?}", other),
        }
    }

    #[test]
    fn flags_build_import_options() {
        let options = import_args(&[
            "dump.sql.gz",
            "out.db",
            "--batch-size",
            "-1",
            "--preserve-case",
            "--overwrite",
            "--format",
            "mysql",
            "--work-dir",
            "/tmp/ferry",
        ])
        .options()
        .unwrap();

        assert_eq!(options.source_path, PathBuf::from("dump.sql.gz"));
        assert_eq!(options.destination_path, PathBuf::from("out.db"));
        assert_eq!(options.commit_batch_size, -1);
        assert_eq!(options.batch_limit(), None);
        assert!(!options.lowercase_identifiers);
        assert!(options.overwrite);
        assert_eq!(options.format, Some(SourceFormat::MySqlDump));
        assert_eq!(options.working_directory, Some(PathBuf::from("/tmp/ferry")));
    }

    #[test]
    fn run_file_values_apply_unless_overridden() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("run.toml");
        std::fs::write(
            &config,
            "commit_batch_size = 250\noverwrite = true\nformat = \"postgres_dump\"\n",
        )
        .unwrap();
        let config_arg = config.to_string_lossy().into_owned();

        let options = import_args(&["a.sql", "b.db", "--config", &config_arg])
            .options()
            .unwrap();
        assert_eq!(options.commit_batch_size, 250);
        assert!(options.overwrite);
        assert!(options.lowercase_identifiers);
        assert_eq!(options.format, Some(SourceFormat::PostgresDump));
        assert_eq!(options.source_path, PathBuf::from("a.sql"));

        let options = import_args(&["a.sql", "b.db", "--config", &config_arg, "--batch-size", "10"])
            .options()
            .unwrap();
        assert_eq!(options.commit_batch_size, 10);
    }

    #[test]
    fn missing_run_file_is_reported_with_its_path() {
        let err = import_args(&["a.sql", "b.db", "--config", "/nonexistent/run.toml"])
            .options()
            .unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/run.toml"));
    }

    #[test]
    fn unknown_formats_are_rejected_by_the_parser() {
        let parsed = Cli::try_parse_from(["ferry", "analyze", "x.sql", "--format", "oracle"]);
        assert!(parsed.is_err());
    }
}
