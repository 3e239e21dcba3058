//! Session factory.
//!
//! The factory is the only place sessions are born: it resolves the
//! configured provider for its session name, opens a connection, registers
//! the session as current in its flow, and only then begins a transaction
//! for committable sessions. Every failure path (cancellation included) closes whatever was
//! already acquired before the outcome is returned.

use crate::accessor::SessionAccessor;
use crate::context::SessionContext;
use crate::options::SessionOptionsSource;
use crate::session::{COMMITTABLE_TYPE, CommittableSession, SESSION_TYPE, Session};
use asupersync::{Cx, Outcome};
use sqlsession_core::error::display_name;
use sqlsession_core::{DbConnection, Error, IsolationLevel, ProviderFactory};
use std::future::Future;
use std::sync::Arc;

/// Creates sessions for one session name within one flow.
pub struct SessionFactory<P: ProviderFactory> {
    options: Arc<dyn SessionOptionsSource<P>>,
    name: Option<String>,
    context: SessionContext<P::Connection>,
}

impl<P: ProviderFactory> Clone for SessionFactory<P> {
    fn clone(&self) -> Self {
        Self {
            options: Arc::clone(&self.options),
            name: self.name.clone(),
            context: self.context.clone(),
        }
    }
}

impl<P: ProviderFactory> std::fmt::Debug for SessionFactory<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory")
            .field("name", &display_name(self.name.as_deref()))
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl<P: ProviderFactory> SessionFactory<P> {
    /// Factory for the default session in a new root flow.
    pub fn new(options: impl SessionOptionsSource<P> + 'static) -> Self {
        Self::with_context(options, SessionContext::new())
    }

    /// Factory for the default session in an existing flow.
    pub fn with_context(
        options: impl SessionOptionsSource<P> + 'static,
        context: SessionContext<P::Connection>,
    ) -> Self {
        Self {
            options: Arc::new(options),
            name: None,
            context,
        }
    }

    /// A factory for `name` sharing this factory's options and flow.
    #[must_use]
    pub fn named(&self, name: impl Into<String>) -> Self {
        Self {
            options: Arc::clone(&self.options),
            name: Some(name.into()),
            context: self.context.clone(),
        }
    }

    /// Same configuration, forked flow.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            options: Arc::clone(&self.options),
            name: self.name.clone(),
            context: self.context.fork(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn context(&self) -> &SessionContext<P::Connection> {
        &self.context
    }

    pub fn accessor(&self) -> SessionAccessor<P::Connection> {
        SessionAccessor::new(self.context.clone())
    }

    /// Open a session without a transaction and register it as current.
    #[tracing::instrument(
        level = "debug",
        skip(self, cx),
        fields(name = display_name(self.name.as_deref()))
    )]
    pub async fn create_session(&self, cx: &Cx) -> Outcome<Session<P::Connection>, Error> {
        let (session, _) = match self.open_session(cx, SESSION_TYPE).await {
            Outcome::Ok(opened) => opened,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        if let Err(e) = self.register(cx, &session).await {
            return Outcome::Err(e);
        }
        tracing::debug!(session_id = %session.id(), "Session created");
        Outcome::Ok(session)
    }

    /// Open a session, register it as current, then begin a transaction at
    /// `isolation`. A failed begin discards the session, which also clears
    /// its registration.
    #[tracing::instrument(
        level = "debug",
        skip(self, cx),
        fields(name = display_name(self.name.as_deref()), isolation = ?isolation)
    )]
    pub async fn create_committable_session(
        &self,
        cx: &Cx,
        isolation: IsolationLevel,
    ) -> Outcome<CommittableSession<P::Connection>, Error> {
        let (session, connection) = match self.open_session(cx, COMMITTABLE_TYPE).await {
            Outcome::Ok(opened) => opened,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        if let Err(e) = self.register(cx, &session).await {
            return Outcome::Err(e);
        }

        let transaction = match connection.begin_transaction(cx, isolation).await {
            Outcome::Ok(transaction) => transaction,
            Outcome::Err(e) => {
                discard(cx, &session).await;
                return Outcome::Err(e);
            }
            Outcome::Cancelled(r) => {
                discard(cx, &session).await;
                return Outcome::Cancelled(r);
            }
            Outcome::Panicked(p) => {
                discard(cx, &session).await;
                return Outcome::Panicked(p);
            }
        };
        if let Err(e) = session.attach_transaction(transaction) {
            discard(cx, &session).await;
            return Outcome::Err(e);
        }
        tracing::debug!(session_id = %session.id(), "Committable session created");
        Outcome::Ok(CommittableSession::from_session(session))
    }

    /// Run `body` with a fresh session, closing it afterwards whatever the
    /// body returned.
    pub async fn with_session<F, Fut, T>(&self, cx: &Cx, body: F) -> Outcome<T, Error>
    where
        F: FnOnce(Session<P::Connection>) -> Fut,
        Fut: Future<Output = Outcome<T, Error>>,
    {
        let session = match self.create_session(cx).await {
            Outcome::Ok(session) => session,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let result = body(session.clone()).await;
        finish_scope(result, session.close(cx).await)
    }

    /// Run `body` inside a committable session.
    ///
    /// Commits when the body returns `Outcome::Ok`, rolls back otherwise,
    /// and always closes the session.
    pub async fn with_committable_session<F, Fut, T>(
        &self,
        cx: &Cx,
        isolation: IsolationLevel,
        body: F,
    ) -> Outcome<T, Error>
    where
        F: FnOnce(CommittableSession<P::Connection>) -> Fut,
        Fut: Future<Output = Outcome<T, Error>>,
    {
        let session = match self.create_committable_session(cx, isolation).await {
            Outcome::Ok(session) => session,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let result = match body(session.clone()).await {
            Outcome::Ok(value) => match session.commit(cx).await {
                Outcome::Ok(()) => Outcome::Ok(value),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            },
            failed => {
                if let Outcome::Err(e) = session.rollback(cx).await {
                    tracing::warn!(error = %e, "Rollback after failed scope body failed");
                }
                failed
            }
        };
        finish_scope(result, session.close(cx).await)
    }

    async fn open_session(
        &self,
        cx: &Cx,
        type_name: &'static str,
    ) -> Outcome<(Session<P::Connection>, Arc<P::Connection>), Error> {
        let name = self.name.as_deref();
        let Some(options) = self.options.resolve(name) else {
            return Outcome::Err(Error::not_configured(name));
        };
        let Some(mut connection) = options.provider().create_connection() else {
            return Outcome::Err(Error::invalid_operation(format!(
                "provider '{}' returned no connection for session '{}'",
                options.provider().name(),
                display_name(name)
            )));
        };
        if let Err(e) = connection.set_connection_string(options.connection_string()) {
            return Outcome::Err(e);
        }

        let connection = Arc::new(connection);
        let session = Session::build(
            Arc::clone(&connection),
            None,
            type_name,
            self.name.clone(),
        );
        tracing::trace!(
            session_id = %session.id(),
            provider = options.provider().name(),
            "Opening connection"
        );
        match connection.open(cx).await {
            Outcome::Ok(()) => Outcome::Ok((session, connection)),
            Outcome::Err(e) => {
                discard(cx, &session).await;
                Outcome::Err(e)
            }
            Outcome::Cancelled(r) => {
                discard(cx, &session).await;
                Outcome::Cancelled(r)
            }
            Outcome::Panicked(p) => {
                discard(cx, &session).await;
                Outcome::Panicked(p)
            }
        }
    }

    #[allow(clippy::result_large_err)]
    async fn register(&self, cx: &Cx, session: &Session<P::Connection>) -> Result<(), Error> {
        if let Err(e) = self.context.set(self.name.as_deref(), Some(session)) {
            discard(cx, session).await;
            return Err(e);
        }
        Ok(())
    }
}

/// Close a session that never reached the caller.
async fn discard<C: DbConnection>(cx: &Cx, session: &Session<C>) {
    if let Err(e) = session.close(cx).await {
        tracing::warn!(session_id = %session.id(), error = %e, "Failed to close abandoned session");
    }
}

fn finish_scope<T>(result: Outcome<T, Error>, closed: Result<(), Error>) -> Outcome<T, Error> {
    match (result, closed) {
        (Outcome::Ok(value), Ok(())) => Outcome::Ok(value),
        (Outcome::Ok(_), Err(e)) => Outcome::Err(e),
        (failed, Err(e)) => {
            tracing::warn!(error = %e, "Failed to close session after failed scope body");
            failed
        }
        (failed, Ok(())) => failed,
    }
}
