//! Query descriptors and per-command options.
//!
//! A [`Query`] separates *what* to run (SQL text plus parameters) from *where*
//! to run it (a session's connection and transaction).

use crate::error::{Error, Result};
use crate::value::Value;
use std::time::Duration;

/// Immutable SQL text + parameter list.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    sql: String,
    params: Vec<Value>,
}

impl Query {
    /// Create a descriptor with no parameters.
    ///
    /// Fails with an invalid-argument error if `sql` is empty or blank.
    #[allow(clippy::result_large_err)]
    pub fn new(sql: impl Into<String>) -> Result<Self> {
        Self::with_params(sql, Vec::new())
    }

    /// Create a descriptor with positional parameters.
    #[allow(clippy::result_large_err)]
    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Result<Self> {
        let sql = sql.into();
        if sql.trim().is_empty() {
            return Err(Error::invalid_argument("sql"));
        }
        Ok(Self { sql, params })
    }

    /// Return a new descriptor with one more positional parameter.
    pub fn bind(&self, value: impl Into<Value>) -> Self {
        let mut params = self.params.clone();
        params.push(value.into());
        Self {
            sql: self.sql.clone(),
            params,
        }
    }

    /// The SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The positional parameters.
    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

/// How the driver should interpret the command text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    /// Plain SQL text.
    #[default]
    Text,
    /// The text names a stored procedure.
    StoredProcedure,
}

/// Options forwarded to the driver with each command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandOptions {
    /// Per-command timeout; `None` uses the connection default.
    pub timeout: Option<Duration>,
    /// Command interpretation.
    pub kind: CommandKind,
}

impl CommandOptions {
    /// Create default options (plain text, connection timeout).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-command timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the command kind.
    pub fn kind(mut self, kind: CommandKind) -> Self {
        self.kind = kind;
        self
    }
}
