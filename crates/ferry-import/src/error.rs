//! Import errors

use ferry_core::FerryError;
use std::path::PathBuf;
use thiserror::Error;

use crate::report::ImportReport;

/// Errors raised while analyzing or importing a source
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error in {} at line {line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("Unsupported schema: {0}")]
    UnsupportedSchema(String),

    #[error("Table '{table}' references missing table '{referenced}'")]
    MissingReferencedTable { table: String, referenced: String },

    #[error("Foreign key cycle between tables: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error(
        "Identifier collision in {scope}: '{first}' and '{second}' both normalize to '{normalized}'"
    )]
    IdentifierCollision {
        scope: String,
        first: String,
        second: String,
        normalized: String,
    },

    #[error("Column '{table}.{column}' has more than one foreign key")]
    AmbiguousForeignKey { table: String, column: String },

    #[error("Destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("Unable to detect the format of {}", .0.display())]
    UnknownFormat(PathBuf),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Destination error: {0}")]
    Destination(String),

    #[error("Import cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<FerryError> for ImportError {
    fn from(e: FerryError) -> Self {
        match e {
            FerryError::Cancelled => ImportError::Cancelled,
            FerryError::Io(io) => ImportError::Io(io),
            other => ImportError::Destination(other.to_string()),
        }
    }
}

impl From<zip::result::ZipError> for ImportError {
    fn from(e: zip::result::ZipError) -> Self {
        ImportError::Decompression(e.to_string())
    }
}

impl ImportError {
    pub(crate) fn parse(path: impl Into<PathBuf>, line: u64, message: impl Into<String>) -> Self {
        ImportError::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ImportError::Cancelled)
    }
}

/// A failed import together with everything it managed to do first
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ImportFailure {
    #[source]
    pub error: ImportError,
    /// Report state at the moment the import stopped
    pub partial: Box<ImportReport>,
}

impl ImportFailure {
    pub fn new(error: ImportError, partial: ImportReport) -> Self {
        Self {
            error,
            partial: Box::new(partial),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }
}
