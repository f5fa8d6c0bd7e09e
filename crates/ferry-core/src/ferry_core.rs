//! Ferry Core - connection abstractions shared by the import engine and drivers
//!
//! This crate defines the small surface the import engine needs from a
//! destination database:
//!
//! - `Connection` - execute DDL/DML, run queries, open transactions
//! - `Transaction` - a single open transaction on a connection
//! - `DatabaseDriver` - opens a `Connection` for a destination file
//! - `Value`, `Row`, `QueryResult` - the data exchanged with the driver

mod connection;
mod driver;
mod error;
mod types;

pub use connection::*;
pub use driver::*;
pub use error::*;
pub use types::*;
