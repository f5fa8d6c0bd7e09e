//! SQLite database driver implementation

mod connection;
mod cursor;
mod driver;
mod schema;

pub use connection::SqliteConnection;
pub use cursor::RowCursor;
pub use driver::SqliteDriver;
pub use schema::{CatalogColumn, CatalogForeignKey, CatalogIndex, CatalogIndexColumn, CatalogTable};
