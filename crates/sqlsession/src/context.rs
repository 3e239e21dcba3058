//! Ambient session storage.
//!
//! A [`SessionContext`] is an explicit flow handle that nested code receives
//! instead of reaching into task-local state. Clones share one flow;
//! [`SessionContext::fork`] starts a child flow holding a copy of the
//! parent's entries, so the child sees the parent's sessions while its own
//! registrations stay invisible to the parent and to its siblings.
//!
//! Entries are weak: a session dropped without disposal no longer occupies
//! its name.
//!
//! Lock order is context then session, never the reverse.

use crate::session::{Session, SessionId, SessionInner, lock};
use sqlsession_core::error::display_name;
use sqlsession_core::{DbConnection, Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

static NEXT_FLOW_ID: AtomicU64 = AtomicU64::new(1);

struct Entry<C: DbConnection> {
    id: SessionId,
    session: Weak<SessionInner<C>>,
}

impl<C: DbConnection> Clone for Entry<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            session: Weak::clone(&self.session),
        }
    }
}

impl<C: DbConnection> Entry<C> {
    fn live(&self) -> Option<Arc<SessionInner<C>>> {
        self.session
            .upgrade()
            .filter(|inner| !inner.disposed.load(Ordering::Acquire))
    }
}

struct Flow<C: DbConnection> {
    id: u64,
    parent: Option<u64>,
    entries: Mutex<HashMap<Option<String>, Entry<C>>>,
}

impl<C: DbConnection> Flow<C> {
    fn new(parent: Option<u64>, entries: HashMap<Option<String>, Entry<C>>) -> Self {
        Self {
            id: NEXT_FLOW_ID.fetch_add(1, Ordering::Relaxed),
            parent,
            entries: Mutex::new(entries),
        }
    }
}

/// Handle to one flow's session registrations.
pub struct SessionContext<C: DbConnection> {
    flow: Arc<Flow<C>>,
}

impl<C: DbConnection> Clone for SessionContext<C> {
    fn clone(&self) -> Self {
        Self {
            flow: Arc::clone(&self.flow),
        }
    }
}

impl<C: DbConnection> Default for SessionContext<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: DbConnection> fmt::Debug for SessionContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("flow", &self.flow.id)
            .field("parent", &self.flow.parent)
            .finish()
    }
}

impl<C: DbConnection> SessionContext<C> {
    /// A new root flow with no registrations.
    pub fn new() -> Self {
        Self {
            flow: Arc::new(Flow::new(None, HashMap::new())),
        }
    }

    /// Start a child flow with a copy of this flow's entries.
    pub fn fork(&self) -> Self {
        let entries = lock(&self.flow.entries).clone();
        let child = Flow::new(Some(self.flow.id), entries);
        tracing::trace!(parent = self.flow.id, flow = child.id, "Forked session context");
        Self {
            flow: Arc::new(child),
        }
    }

    /// Numeric id of the flow, for logs.
    pub fn flow_id(&self) -> u64 {
        self.flow.id
    }

    /// Whether both handles refer to the same flow.
    pub fn same_flow(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.flow, &other.flow)
    }

    /// The live session registered under `name`, if any.
    pub fn get(&self, name: Option<&str>) -> Option<Session<C>> {
        let key = name.map(str::to_owned);
        let candidate = {
            let entries = lock(&self.flow.entries);
            entries.get(&key).and_then(Entry::live)
        };
        candidate.map(Session::from_inner)
    }

    /// Register `session` under `name`, or clear the entry with `None`.
    ///
    /// Fails with an already-exists error while any live session holds the
    /// name, including `session` itself.
    #[allow(clippy::result_large_err)]
    pub fn set(&self, name: Option<&str>, session: Option<&Session<C>>) -> Result<()> {
        let key = name.map(str::to_owned);
        let Some(session) = session else {
            lock(&self.flow.entries).remove(&key);
            tracing::trace!(
                flow = self.flow.id,
                name = display_name(name),
                "Cleared session entry"
            );
            return Ok(());
        };
        if session.is_disposed() {
            return Err(session.disposed_error());
        }

        let mut entries = lock(&self.flow.entries);
        let occupant = entries.get(&key).and_then(Entry::live);
        let conflict = occupant.is_some();
        if !conflict {
            entries.insert(
                key.clone(),
                Entry {
                    id: session.id(),
                    session: session.downgrade(),
                },
            );
        }
        drop(entries);
        // the occupant may hold the last strong reference; it must not be
        // dropped while the entries lock is held
        drop(occupant);

        if conflict {
            tracing::debug!(
                flow = self.flow.id,
                name = display_name(name),
                "Session already registered"
            );
            return Err(Error::already_exists(name));
        }
        session.record_registration(self.clone(), key);
        tracing::trace!(
            flow = self.flow.id,
            name = display_name(name),
            session_id = %session.id(),
            "Registered session"
        );
        Ok(())
    }

    /// Remove the entry for `name` only if it still points at `id`.
    pub(crate) fn clear_if_current(&self, name: Option<&str>, id: SessionId) {
        let key = name.map(str::to_owned);
        let mut entries = lock(&self.flow.entries);
        if entries.get(&key).is_some_and(|entry| entry.id == id) {
            entries.remove(&key);
        }
    }
}
