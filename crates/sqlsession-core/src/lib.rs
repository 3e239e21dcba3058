//! Core types and traits for SQLSession Rust.
//!
//! This crate holds everything the session layer and the drivers agree on:
//!
//! - `Error` taxonomy shared by sessions and drivers
//! - `Value` / `Row` for untyped results, `FromValue` / `TypeDeserializer` for typed ones
//! - `Query` descriptors and `CommandOptions`
//! - The driver contract: `ProviderFactory`, `DbConnection`, `DbTransaction`
//! - `Outcome` / `Cx` re-exports from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod deserialize;
pub mod error;
pub mod query;
pub mod row;
pub mod value;

pub use connection::{DbConnection, DbTransaction, IsolationLevel, ProviderFactory};
pub use deserialize::{
    FnDeserializer, FromRow, RowDeserializer, SerdeDeserializer, TypeDeserializer,
    deserialize_all,
};
pub use error::{Error, Result, SessionError, SessionErrorKind};
pub use query::{CommandKind, CommandOptions, Query};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
