//! embeddb: an embedded, SQLite-file-format-compatible relational storage
//! and query engine.
//!
//! The top-level [`Db`] handle owns a [`pager::Pager`] and a cached
//! [`schema::Catalog`]; [`Writer`] performs DDL and row mutation inside a
//! transaction, [`executor::Reader`] streams query results, and
//! [`Snapshot`] captures a point-in-time, isolated view for concurrent
//! readers. See the module docs on each of these for the details.

mod btree;
mod crypto;
mod dbheader;
pub mod db;
pub mod error;
pub mod executor;
pub mod filter;
mod formatting;
mod freelist;
mod guid;
mod journal;
pub mod pager;
pub mod pool;
pub mod project;
mod record;
pub mod schema;
mod serial_type;
pub mod snapshot;
pub mod sql_type;
pub mod sql_value;
pub mod table_traits;
pub mod temp_table;
pub mod typed_row;
mod varint;
pub mod writer;

extern crate pest;
#[macro_use]
extern crate pest_derive;

pub use db::Db;
pub use error::{Error, Result};
pub use executor::Reader;
pub use pager::OpenOptions;
pub use snapshot::{create_snapshot, Snapshot};
pub use writer::Writer;

/// Opens an existing database file at `path`.
pub fn open(path: &str, opts: &OpenOptions) -> Result<Db> {
    Db::open(path, opts)
}

/// Opens a database image already resident in memory (e.g. loaded from a
/// network blob or a test fixture) rather than a file on disk.
pub fn open_memory(bytes: Vec<u8>, opts: &OpenOptions) -> Result<Db> {
    Db::open_memory(bytes, opts)
}

/// Creates a new, empty database file at `path`.
pub fn create(path: &str, opts: &OpenOptions) -> Result<Db> {
    Db::create(path, opts)
}

/// Creates a new, empty in-memory database with no backing file.
pub fn create_in_memory(opts: &OpenOptions) -> Result<Db> {
    Db::create_in_memory(opts)
}
