//! SQLite driver for SQLSession Rust.
//!
// FFI bindings require unsafe code
#![allow(unsafe_code)]
//!
//! Implements the driver contract from sqlsession-core (`ProviderFactory`,
//! `DbConnection`, `DbTransaction`) on top of the bundled libsqlite3.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlsession::{SessionFactory, SessionOptions};
//! use sqlsession_sqlite::SqliteProvider;
//! use std::sync::Arc;
//!
//! let options = SessionOptions::new(Arc::new(SqliteProvider::new()), "path=app.db; busy_timeout=1000")?;
//! let factory = SessionFactory::new(options);
//! let session = factory.create_session(&cx).await;
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite Type |
//! |-------|-------------|
//! | `Bool` | INTEGER (0/1) |
//! | `Int`, `BigInt` | INTEGER |
//! | `Double` | REAL |
//! | `Text` | TEXT |
//! | `Bytes` | BLOB |
//! | `Json` | TEXT |
//! | `Null` | NULL |
//!
//! # Transactions
//!
//! SQLite has no per-transaction isolation levels. The requested level picks
//! the lock taken at `BEGIN`: `Serializable` and `Snapshot` begin
//! `EXCLUSIVE`, `RepeatableRead` and `ReadCommitted` begin `IMMEDIATE`,
//! `ReadUncommitted` begins `DEFERRED`.

pub mod config;
pub mod connection;
pub mod ffi;
pub mod types;

pub use config::{OpenMode, SqliteConfig};
pub use connection::{SqliteConnection, SqliteProvider, SqliteTransaction};

/// Re-export the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// Re-export the SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}
