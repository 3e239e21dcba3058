//! Session lifecycle.
//!
//! A [`Session`] pairs an opened connection with an optional transaction and
//! walks a small state machine:
//!
//! ```text
//! Active ──commit──▶ Committed ─┐
//!    │                          ├──close/release──▶ Disposed
//!    ├──rollback──▶ RolledBack ─┘
//!    └──────────close/release────────────────────▶ Disposed
//! ```
//!
//! `Session` is a cheap handle: clones share the same underlying session, so
//! the ambient context and the caller can both hold it. Dropping the last
//! handle of a session that was never closed releases it synchronously and
//! logs a warning.

use crate::context::SessionContext;
use crate::items::SessionItems;
use asupersync::{Cx, Outcome};
use sqlsession_core::{DbConnection, DbTransaction, Error, IsolationLevel, Result};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) const SESSION_TYPE: &str = "Session";
pub(crate) const COMMITTABLE_TYPE: &str = "CommittableSession";

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Active,
    Committed,
    RolledBack,
    Disposed,
}

impl SessionState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Committed => "committed",
            SessionState::RolledBack => "rolled_back",
            SessionState::Disposed => "disposed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of the one-shot finished notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionFinished {
    pub session_id: SessionId,
    /// Terminal state: `Committed`, `RolledBack` or `Disposed`.
    pub state: SessionState,
}

type FinishedCallback = Box<dyn FnOnce(SessionFinished) + Send>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An ambient registration made for this session.
struct Registration<C: DbConnection> {
    context: SessionContext<C>,
    name: Option<String>,
}

struct Lifecycle<C: DbConnection> {
    connection: Option<Arc<C>>,
    transaction: Option<Arc<C::Transaction>>,
    isolation: IsolationLevel,
    state: SessionState,
    completed: bool,
    finished_fired: bool,
    finished: Vec<FinishedCallback>,
    registrations: Vec<Registration<C>>,
}

/// Everything a disposal has to release, taken out under the lock.
struct Parts<C: DbConnection> {
    connection: Option<Arc<C>>,
    transaction: Option<Arc<C::Transaction>>,
    registrations: Vec<Registration<C>>,
    finished: Vec<FinishedCallback>,
}

pub(crate) struct SessionInner<C: DbConnection> {
    pub(crate) id: SessionId,
    type_name: &'static str,
    name: Option<String>,
    pub(crate) disposed: AtomicBool,
    lifecycle: Mutex<Lifecycle<C>>,
    items: Mutex<SessionItems>,
}

impl<C: DbConnection> SessionInner<C> {
    /// Mark disposed and take out the parts. Returns `None` if disposal had
    /// already started.
    fn begin_disposal(&self) -> Option<Parts<C>> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return None;
        }
        let mut lifecycle = lock(&self.lifecycle);
        let finished = if lifecycle.finished_fired {
            Vec::new()
        } else {
            lifecycle.finished_fired = true;
            std::mem::take(&mut lifecycle.finished)
        };
        lifecycle.state = SessionState::Disposed;
        Some(Parts {
            connection: lifecycle.connection.take(),
            transaction: lifecycle.transaction.take(),
            registrations: std::mem::take(&mut lifecycle.registrations),
            finished,
        })
    }

    fn finish_disposal(
        &self,
        registrations: Vec<Registration<C>>,
        finished: Vec<FinishedCallback>,
    ) {
        for registration in registrations {
            registration
                .context
                .clear_if_current(registration.name.as_deref(), self.id);
        }
        notify(
            finished,
            SessionFinished {
                session_id: self.id,
                state: SessionState::Disposed,
            },
        );
    }

    /// Synchronous release. Handles are dropped, so transaction rollback and
    /// connection close fall to the driver's `Drop`.
    fn release_now(&self) -> bool {
        let Some(parts) = self.begin_disposal() else {
            return false;
        };
        drop(parts.transaction);
        drop(parts.connection);
        for item in lock(&self.items).drain() {
            item.release_sync();
        }
        self.finish_disposal(parts.registrations, parts.finished);
        tracing::debug!(session_id = %self.id, "Session released");
        true
    }
}

impl<C: DbConnection> Drop for SessionInner<C> {
    fn drop(&mut self) {
        if !self.disposed.load(Ordering::Acquire) {
            tracing::warn!(
                session_id = %self.id,
                name = sqlsession_core::error::display_name(self.name.as_deref()),
                "Session dropped without close; releasing synchronously"
            );
            self.release_now();
        }
    }
}

fn notify(callbacks: Vec<FinishedCallback>, event: SessionFinished) {
    for callback in callbacks {
        callback(event);
    }
}

#[derive(Debug, Clone, Copy)]
enum Completion {
    Commit,
    Rollback,
}

/// A database session: connection + optional transaction + items.
pub struct Session<C: DbConnection> {
    inner: Arc<SessionInner<C>>,
}

impl<C: DbConnection> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: DbConnection> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.inner.type_name)
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl<C: DbConnection> Session<C> {
    /// Wrap an opened connection and an optional transaction.
    pub fn new(connection: Arc<C>, transaction: Option<C::Transaction>) -> Self {
        Self::build(connection, transaction, SESSION_TYPE, None)
    }

    /// Like [`Session::new`] but rejects a missing connection with an
    /// invalid-argument error.
    #[allow(clippy::result_large_err)]
    pub fn from_parts(
        connection: Option<Arc<C>>,
        transaction: Option<C::Transaction>,
    ) -> Result<Self> {
        let connection = connection.ok_or_else(|| Error::invalid_argument("connection"))?;
        Ok(Self::new(connection, transaction))
    }

    pub(crate) fn build(
        connection: Arc<C>,
        transaction: Option<C::Transaction>,
        type_name: &'static str,
        name: Option<String>,
    ) -> Self {
        let isolation = transaction
            .as_ref()
            .map_or(IsolationLevel::Unspecified, DbTransaction::isolation_level);
        let inner = SessionInner {
            id: SessionId::next(),
            type_name,
            name,
            disposed: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle {
                connection: Some(connection),
                transaction: transaction.map(Arc::new),
                isolation,
                state: SessionState::Active,
                completed: false,
                finished_fired: false,
                finished: Vec::new(),
                registrations: Vec::new(),
            }),
            items: Mutex::new(SessionItems::default()),
        };
        tracing::trace!(session_id = %inner.id, session_type = type_name, "Session created");
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner<C>>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<SessionInner<C>> {
        Arc::downgrade(&self.inner)
    }

    /// Attach a freshly begun transaction to a session that has none.
    #[allow(clippy::result_large_err)]
    pub(crate) fn attach_transaction(&self, transaction: C::Transaction) -> Result<()> {
        let mut lifecycle = self.live()?;
        if lifecycle.transaction.is_some() {
            return Err(Error::invalid_operation(
                "session already owns a transaction",
            ));
        }
        lifecycle.isolation = transaction.isolation_level();
        lifecycle.transaction = Some(Arc::new(transaction));
        Ok(())
    }

    pub(crate) fn record_registration(&self, context: SessionContext<C>, name: Option<String>) {
        lock(&self.inner.lifecycle)
            .registrations
            .push(Registration { context, name });
    }

    #[allow(clippy::result_large_err)]
    fn live(&self) -> Result<MutexGuard<'_, Lifecycle<C>>> {
        if self.is_disposed() {
            return Err(self.disposed_error());
        }
        let lifecycle = lock(&self.inner.lifecycle);
        if lifecycle.state == SessionState::Disposed {
            return Err(self.disposed_error());
        }
        Ok(lifecycle)
    }

    pub(crate) fn disposed_error(&self) -> Error {
        Error::disposed(self.inner.type_name)
    }

    /// Process-unique id of this session.
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// The name this session was created under, `None` for the default one.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// `"Session"` or `"CommittableSession"`.
    pub fn type_name(&self) -> &'static str {
        self.inner.type_name
    }

    /// Whether disposal has started.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Whether two handles refer to the same session.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The session's connection.
    #[allow(clippy::result_large_err)]
    pub fn connection(&self) -> Result<Arc<C>> {
        self.live()?
            .connection
            .clone()
            .ok_or_else(|| self.disposed_error())
    }

    /// The session's transaction, `None` if it was created without one.
    #[allow(clippy::result_large_err)]
    pub fn transaction(&self) -> Result<Option<Arc<C::Transaction>>> {
        Ok(self.live()?.transaction.clone())
    }

    /// Isolation level of the transaction, `Unspecified` without one.
    #[allow(clippy::result_large_err)]
    pub fn isolation_level(&self) -> Result<IsolationLevel> {
        Ok(self.live()?.isolation)
    }

    /// Current lifecycle state.
    #[allow(clippy::result_large_err)]
    pub fn state(&self) -> Result<SessionState> {
        Ok(self.live()?.state)
    }

    /// Whether the transaction has been committed or rolled back.
    #[allow(clippy::result_large_err)]
    pub fn is_completed(&self) -> Result<bool> {
        Ok(self.live()?.completed)
    }

    /// The session's item bag.
    ///
    /// The guard must not be held across an await.
    #[allow(clippy::result_large_err)]
    pub fn items(&self) -> Result<MutexGuard<'_, SessionItems>> {
        if self.is_disposed() {
            return Err(self.disposed_error());
        }
        Ok(lock(&self.inner.items))
    }

    /// Connection and, while not yet completed, the transaction that
    /// commands should run under.
    #[allow(clippy::result_large_err)]
    pub(crate) fn command_target(&self) -> Result<(Arc<C>, Option<Arc<C::Transaction>>)> {
        let lifecycle = self.live()?;
        let connection = lifecycle
            .connection
            .clone()
            .ok_or_else(|| self.disposed_error())?;
        let transaction = if lifecycle.completed {
            None
        } else {
            lifecycle.transaction.clone()
        };
        Ok((connection, transaction))
    }

    /// Register an observer for the one-shot finished notification.
    ///
    /// Observers registered after the notification has fired are dropped
    /// without being called.
    pub fn on_finished<F>(&self, callback: F)
    where
        F: FnOnce(SessionFinished) + Send + 'static,
    {
        let mut lifecycle = lock(&self.inner.lifecycle);
        if !lifecycle.finished_fired {
            lifecycle.finished.push(Box::new(callback));
        }
    }

    /// Commit the transaction.
    ///
    /// No-op without a transaction, after completion, or once disposal has
    /// started. A failed commit leaves the session active.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(session_id = %self.id()))]
    pub async fn commit(&self, cx: &Cx) -> Outcome<(), Error> {
        self.complete(cx, Completion::Commit).await
    }

    /// Roll back the transaction. Same no-op rules as [`Session::commit`].
    #[tracing::instrument(level = "debug", skip(self, cx), fields(session_id = %self.id()))]
    pub async fn rollback(&self, cx: &Cx) -> Outcome<(), Error> {
        self.complete(cx, Completion::Rollback).await
    }

    async fn complete(&self, cx: &Cx, completion: Completion) -> Outcome<(), Error> {
        let transaction = {
            if self.is_disposed() {
                return Outcome::Ok(());
            }
            let lifecycle = lock(&self.inner.lifecycle);
            if lifecycle.completed {
                return Outcome::Ok(());
            }
            match &lifecycle.transaction {
                Some(transaction) => Arc::clone(transaction),
                None => return Outcome::Ok(()),
            }
        };

        let result = match completion {
            Completion::Commit => transaction.commit(cx).await,
            Completion::Rollback => transaction.rollback(cx).await,
        };
        match result {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => {
                tracing::debug!(error = %e, ?completion, "Transaction completion failed");
                return Outcome::Err(e);
            }
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        let state = match completion {
            Completion::Commit => SessionState::Committed,
            Completion::Rollback => SessionState::RolledBack,
        };
        let callbacks = {
            let mut lifecycle = lock(&self.inner.lifecycle);
            if lifecycle.completed || lifecycle.state == SessionState::Disposed {
                return Outcome::Ok(());
            }
            lifecycle.completed = true;
            lifecycle.state = state;
            lifecycle.finished_fired = true;
            std::mem::take(&mut lifecycle.finished)
        };
        tracing::debug!(%state, "Session transaction completed");
        notify(
            callbacks,
            SessionFinished {
                session_id: self.id(),
                state,
            },
        );
        Outcome::Ok(())
    }

    /// Dispose the session: close the transaction, then the connection,
    /// then items, then clear its ambient registrations.
    ///
    /// Idempotent. Cleanup is not interrupted by cancellation; every step
    /// runs and the first failure is reported.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(session_id = %self.id()))]
    #[allow(clippy::result_large_err)]
    pub async fn close(&self, cx: &Cx) -> Result<()> {
        let Some(parts) = self.inner.begin_disposal() else {
            return Ok(());
        };
        let mut first_error: Option<Error> = None;

        if let Some(transaction) = parts.transaction {
            if let Err(e) = transaction.close(cx).await {
                tracing::warn!(error = %e, "Failed to close transaction");
                first_error.get_or_insert(e);
            }
        }
        if let Some(connection) = parts.connection {
            if let Err(e) = connection.close(cx).await {
                tracing::warn!(error = %e, "Failed to close connection");
                first_error.get_or_insert(e);
            }
        }
        let items = lock(&self.inner.items).drain();
        for item in &items {
            item.release_async(cx).await;
        }

        self.inner.finish_disposal(parts.registrations, parts.finished);
        tracing::debug!("Session closed");
        first_error.map_or(Ok(()), Err)
    }

    /// Synchronous disposal.
    ///
    /// Drops the connection and transaction handles, leaving rollback and
    /// close to the driver's `Drop`. Only synchronous item capabilities run;
    /// async-only items are dropped.
    pub fn release(&self) {
        self.inner.release_now();
    }
}

/// A session that always carries a transaction.
pub struct CommittableSession<C: DbConnection> {
    session: Session<C>,
}

impl<C: DbConnection> Clone for CommittableSession<C> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
        }
    }
}

impl<C: DbConnection> fmt::Debug for CommittableSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.session.fmt(f)
    }
}

impl<C: DbConnection> CommittableSession<C> {
    /// Wrap an opened connection and the transaction begun on it.
    pub fn new(connection: Arc<C>, transaction: C::Transaction) -> Self {
        Self {
            session: Session::build(connection, Some(transaction), COMMITTABLE_TYPE, None),
        }
    }

    pub(crate) fn from_session(session: Session<C>) -> Self {
        Self { session }
    }

    pub async fn commit(&self, cx: &Cx) -> Outcome<(), Error> {
        self.session.commit(cx).await
    }

    pub async fn rollback(&self, cx: &Cx) -> Outcome<(), Error> {
        self.session.rollback(cx).await
    }

    #[allow(clippy::result_large_err)]
    pub async fn close(&self, cx: &Cx) -> Result<()> {
        self.session.close(cx).await
    }

    pub fn release(&self) {
        self.session.release();
    }

    /// The underlying session handle.
    pub fn into_session(self) -> Session<C> {
        self.session
    }
}

impl<C: DbConnection> Deref for CommittableSession<C> {
    type Target = Session<C>;

    fn deref(&self) -> &Session<C> {
        &self.session
    }
}
