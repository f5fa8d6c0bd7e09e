//! Database driver trait definition

use crate::{Connection, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Opens destination connections for a file path
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Driver identifier (e.g., "sqlite")
    fn name(&self) -> &'static str;

    /// Human readable name
    fn display_name(&self) -> &'static str;

    /// Open (creating if needed) the database stored at `path`
    async fn connect(&self, path: &Path) -> Result<Arc<dyn Connection>>;

    /// Files that belong to the database at `path` besides the main file
    /// (journals, write-ahead logs). Removed together with it on overwrite.
    fn companion_files(&self, _path: &Path) -> Vec<std::path::PathBuf> {
        Vec::new()
    }
}
