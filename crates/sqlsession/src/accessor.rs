//! Read-side view of the ambient session storage.

use crate::context::SessionContext;
use crate::session::Session;
use sqlsession_core::{DbConnection, Error, Result};

/// Resolves the current session of a flow for code that only needs to read
/// it.
pub struct SessionAccessor<C: DbConnection> {
    context: SessionContext<C>,
}

impl<C: DbConnection> Clone for SessionAccessor<C> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<C: DbConnection> std::fmt::Debug for SessionAccessor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAccessor")
            .field("context", &self.context)
            .finish()
    }
}

impl<C: DbConnection> SessionAccessor<C> {
    pub fn new(context: SessionContext<C>) -> Self {
        Self { context }
    }

    /// The default (unnamed) session.
    ///
    /// Fails with a no-current-session error when none is registered.
    #[allow(clippy::result_large_err)]
    pub fn current_session(&self) -> Result<Session<C>> {
        self.context.get(None).ok_or_else(Error::no_current_session)
    }

    /// The session registered under `name`, if any.
    pub fn session(&self, name: Option<&str>) -> Option<Session<C>> {
        self.context.get(name)
    }

    /// Like [`session`](Self::session) but fails when nothing is registered.
    #[allow(clippy::result_large_err)]
    pub fn require_session(&self, name: Option<&str>) -> Result<Session<C>> {
        match name {
            None => self.current_session(),
            Some(_) => self
                .context
                .get(name)
                .ok_or_else(|| Error::no_session_named(name)),
        }
    }

    pub fn has_current_session(&self) -> bool {
        self.context.get(None).is_some()
    }

    pub fn context(&self) -> &SessionContext<C> {
        &self.context
    }
}
