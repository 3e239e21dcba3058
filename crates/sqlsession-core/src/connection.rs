//! Driver contract.
//!
//! The session layer never talks SQL itself. It drives these traits:
//!
//! - [`ProviderFactory`] - creates unopened connections for a driver
//! - [`DbConnection`] - open/close, transaction begin, command execution
//! - [`DbTransaction`] - commit/rollback/close of one transaction
//! - [`IsolationLevel`] - SQL transaction isolation levels
//!
//! All suspending operations take a `Cx` for cancellation and return an
//! [`Outcome`]. Release operations (`close`) are not cancellable: they
//! always run to completion and report plain `Result`s.

use crate::error::{Error, Result};
use crate::query::{CommandOptions, Query};
use crate::row::Row;
use asupersync::{Cx, Outcome};
use std::future::Future;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// No level requested; the driver applies its own default.
    #[default]
    Unspecified,

    /// Read uncommitted: dirty reads, non-repeatable reads, and phantoms possible.
    ReadUncommitted,

    /// Read committed: only committed changes from others are visible.
    ReadCommitted,

    /// Repeatable read: rows read once stay stable for the transaction.
    RepeatableRead,

    /// Serializable: transactions appear to execute sequentially.
    Serializable,

    /// Snapshot: reads see a consistent snapshot taken at transaction start.
    Snapshot,
}

impl IsolationLevel {
    /// Get the SQL syntax for this isolation level.
    ///
    /// Returns `None` for [`IsolationLevel::Unspecified`].
    #[must_use]
    pub const fn as_sql(&self) -> Option<&'static str> {
        match self {
            IsolationLevel::Unspecified => None,
            IsolationLevel::ReadUncommitted => Some("READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => Some("READ COMMITTED"),
            IsolationLevel::RepeatableRead => Some("REPEATABLE READ"),
            IsolationLevel::Serializable => Some("SERIALIZABLE"),
            IsolationLevel::Snapshot => Some("SNAPSHOT"),
        }
    }
}

/// Creates connections for one driver.
///
/// A factory returning `None` is a defined failure: the session factory
/// rejects it with an invalid-operation error.
pub trait ProviderFactory: Send + Sync + 'static {
    /// The connection type produced by this provider.
    type Connection: DbConnection;

    /// Driver name, used in logs.
    fn name(&self) -> &str;

    /// Create a new, unopened connection.
    fn create_connection(&self) -> Option<Self::Connection>;
}

/// A database connection capable of executing commands.
///
/// Implementations must be `Send + Sync`; sessions share the handle between
/// the caller and the ambient context.
pub trait DbConnection: Send + Sync + 'static {
    /// The transaction type returned by this connection.
    type Transaction: DbTransaction;

    /// The configured connection string.
    fn connection_string(&self) -> &str;

    /// Set the connection string. Must be called before [`open`](DbConnection::open).
    #[allow(clippy::result_large_err)]
    fn set_connection_string(&mut self, connection_string: &str) -> Result<()>;

    /// Whether the connection is currently open.
    fn is_open(&self) -> bool;

    /// Open the connection.
    fn open(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Begin a transaction at the given isolation level.
    fn begin_transaction(
        &self,
        cx: &Cx,
        isolation: IsolationLevel,
    ) -> impl Future<Output = Outcome<Self::Transaction, Error>> + Send;

    /// Run a command and return all rows.
    fn query(
        &self,
        cx: &Cx,
        query: &Query,
        transaction: Option<&Self::Transaction>,
        options: &CommandOptions,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Run a command and return the number of rows affected.
    fn execute(
        &self,
        cx: &Cx,
        query: &Query,
        transaction: Option<&Self::Transaction>,
        options: &CommandOptions,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Close the connection. Idempotent.
    fn close(&self, cx: &Cx) -> impl Future<Output = Result<()>> + Send;
}

/// One database transaction.
///
/// Closing a transaction that was neither committed nor rolled back is an
/// implicit rollback; that is the driver's responsibility, not the session's.
pub trait DbTransaction: Send + Sync + 'static {
    /// The isolation level the transaction was started with.
    fn isolation_level(&self) -> IsolationLevel;

    /// Commit the transaction, making all changes permanent.
    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Roll back the transaction, discarding all changes.
    fn rollback(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Release the transaction. Idempotent.
    fn close(&self, cx: &Cx) -> impl Future<Output = Result<()>> + Send;
}
