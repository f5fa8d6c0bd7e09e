//! Options for one analyze or import run

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{ImportError, SourceFormat};

pub const DEFAULT_COMMIT_BATCH_SIZE: i64 = 5000;

/// Configuration for a single import
///
/// Loadable from TOML; every field has a default so a run file only needs
/// the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenericImportOptions {
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    /// Skip detection and read the source as this format
    pub format: Option<SourceFormat>,
    pub lowercase_identifiers: bool,
    /// Rows per destination transaction; zero or negative means one
    /// transaction per table
    pub commit_batch_size: i64,
    pub overwrite: bool,
    /// Where compressed sources are extracted
    pub working_directory: Option<PathBuf>,
}

impl Default for GenericImportOptions {
    fn default() -> Self {
        Self {
            source_path: PathBuf::new(),
            destination_path: PathBuf::new(),
            format: None,
            lowercase_identifiers: true,
            commit_batch_size: DEFAULT_COMMIT_BATCH_SIZE,
            overwrite: false,
            working_directory: None,
        }
    }
}

impl GenericImportOptions {
    pub fn new(source_path: impl Into<PathBuf>, destination_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ImportError> {
        toml::from_str(text).map_err(|e| ImportError::Configuration(e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ImportError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(|e| match e {
            ImportError::Configuration(msg) => {
                ImportError::Configuration(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn with_format(mut self, format: SourceFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_batch_size(mut self, size: i64) -> Self {
        self.commit_batch_size = size;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_lowercase_identifiers(mut self, lowercase: bool) -> Self {
        self.lowercase_identifiers = lowercase;
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Rows per commit, or `None` for a single transaction per table
    pub fn batch_limit(&self) -> Option<u64> {
        (self.commit_batch_size > 0).then_some(self.commit_batch_size as u64)
    }
}
