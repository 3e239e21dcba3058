//! SQLSession Rust - database sessions with a lifecycle and ambient lookup.
//!
//! A session pairs one opened connection with an optional transaction and
//! exposes a uniform query/execute surface over the pair. Sessions are born
//! in a [`SessionFactory`], which registers them as the current session of a
//! [`SessionContext`] flow so nested code can reach them through a
//! [`SessionAccessor`] instead of taking them as parameters.
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlsession::prelude::*;
//! use sqlsession_sqlite::SqliteProvider;
//!
//! async fn debit(cx: &Cx, factory: &SessionFactory<SqliteProvider>) -> Outcome<u64, Error> {
//!     factory
//!         .with_committable_session(cx, IsolationLevel::Serializable, |session| async move {
//!             session
//!                 .execute(cx, "UPDATE accounts SET balance = balance - 10 WHERE id = ?", &[1_i64.into()])
//!                 .await
//!         })
//!         .await
//! }
//!
//! let options = SessionOptions::new(Arc::new(SqliteProvider::new()), "bank.db")?;
//! let factory = SessionFactory::new(options);
//! ```
//!
//! # Lifecycle
//!
//! `Active -> Committed | RolledBack -> Disposed`. Commit and rollback run at
//! most once; close is idempotent and releases everything the session holds
//! before clearing its ambient entry.

pub use asupersync::{Cx, Outcome};

pub mod accessor;
pub mod context;
pub mod factory;
pub mod items;
pub mod options;
pub mod query;
pub mod session;

#[cfg(test)]
mod testing;

pub use accessor::SessionAccessor;
pub use context::SessionContext;
pub use factory::SessionFactory;
pub use items::{AsyncDispose, Dispose, SessionItems};
pub use options::{ConnectionSettings, NamedSessionOptions, SessionOptions, SessionOptionsSource};
pub use session::{CommittableSession, Session, SessionFinished, SessionId, SessionState};

pub use sqlsession_core::{
    ColumnInfo, CommandKind, CommandOptions, DbConnection, DbTransaction, Error, FnDeserializer,
    FromRow, FromValue, IsolationLevel, ProviderFactory, Query, Result, Row, RowDeserializer,
    SerdeDeserializer, SessionError, SessionErrorKind, TypeDeserializer, Value,
};

/// Common imports for session code.
pub mod prelude {
    pub use crate::{
        CommandOptions, CommittableSession, Cx, Error, FromRow, IsolationLevel, Outcome, Query,
        Result, Row, Session, SessionAccessor, SessionContext, SessionFactory, SessionOptions,
        SessionState, Value,
    };
    pub use std::sync::Arc;
}
