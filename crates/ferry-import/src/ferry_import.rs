//! Ferry import engine
//!
//! Migrates SQLite databases, PostgreSQL plain dumps, `mysqldump` output and
//! MySQL Shell dump directories into a destination SQL store.
//!
//! # Architecture
//!
//! ```text
//! source path → decompress → detect_format → SourceReader → SourceSchema
//!                                                              ↓
//!         destination ← pipeline (schema, copy, indexes) ← ImportPlan
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let options = GenericImportOptions::new("shop.sql.gz", "shop.db");
//! let report = import_source(&options, &SqliteDriver::new(), None, &CancellationToken::new()).await?;
//! println!("{} rows", report.total_rows());
//! ```

mod decompress;
mod destination;
pub mod dialects;
mod error;
mod format;
mod importer;
mod naming;
mod options;
mod ordering;
mod pipeline;
mod plan;
mod progress;
mod report;
mod row_stream;
mod schema;
mod sql;
mod type_mapping;
mod value_coercion;

pub use decompress::{Compression, ExtractedSource, cleanup_temp_dir, decompress, is_compressed};
pub use destination::{
    DestinationDialect, SqliteDestination, StandardDestination, get_destination_dialect,
};
pub use dialects::SourceReader;
pub use error::{ImportError, ImportFailure};
pub use format::{SourceFormat, detect_format, resolve_dump_path};
pub use importer::{Importer, SourceImporter, analyze_source, detect_source, import_source};
pub use naming::{IdentifierCase, IndexNamer, NameMaps, build_name_maps};
pub use options::{DEFAULT_COMMIT_BATCH_SIZE, GenericImportOptions};
pub use ordering::toposort;
pub use pipeline::{ImportSession, MAX_ROW_WARNINGS_PER_TABLE, plan_source, run_import};
pub use plan::{ImportPlan, IndexPlan, TablePlan, build_plan};
pub use progress::{ImportPhase, ImportProgress, ImportProgressCallback, PROGRESS_ROW_INTERVAL};
pub use report::{GenericAnalysisResult, ImportReport, SkippedIndex};
pub use row_stream::{ROW_CHANNEL_CAPACITY, RowEvent, RowSink, RowStream};
pub use schema::{
    ChunkDialect, DataLocation, DataSegment, SegmentKind, SourceColumn, SourceForeignKey,
    SourceIndex, SourceSchema, SourceTable,
};
pub use sql::{ColumnSpec, TableSpec, create_index_sql, quote_identifier};
pub use type_mapping::*;
pub use value_coercion::{coerce_value, decode_hex_literal, parse_bool};
