//! SQLite driver implementation

use async_trait::async_trait;
use ferry_core::{Connection, DatabaseDriver, FerryError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::SqliteConnection;

/// SQLite database driver
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver instance
    pub fn new() -> Self {
        tracing::debug!("SQLite driver initialized");
        Self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn display_name(&self) -> &'static str {
        "SQLite"
    }

    #[tracing::instrument(skip(self), fields(path = %path.display()))]
    async fn connect(&self, path: &Path) -> Result<Arc<dyn Connection>> {
        let conn = SqliteConnection::open(path).map_err(|e| {
            tracing::error!(error = %e, "failed to connect to SQLite database");
            FerryError::Connection(format!("Failed to connect to SQLite database: {}", e))
        })?;

        tracing::info!("SQLite connection created");
        Ok(Arc::new(conn))
    }

    fn companion_files(&self, path: &Path) -> Vec<PathBuf> {
        ["-wal", "-shm", "-journal"]
            .iter()
            .map(|suffix| {
                let mut name = path.as_os_str().to_owned();
                name.push(suffix);
                PathBuf::from(name)
            })
            .collect()
    }
}
