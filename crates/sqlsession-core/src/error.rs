//! Error types for SQLSession operations.

use std::fmt;

/// The primary error type for all SQLSession operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (open, close, lost connection)
    Connection(ConnectionError),
    /// Query execution errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction errors raised by a driver
    Transaction(TransactionError),
    /// Session lifecycle and ambient registration errors
    Session(SessionError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection is not open
    NotOpen,
    /// Connection lost during operation
    Disconnected,
    /// Connection string could not be parsed
    InvalidConnectionString,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Database is busy or locked
    Busy,
    /// Command shape the driver does not support
    Unsupported,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// A transaction is already open on the connection
    AlreadyActive,
    /// Commit or rollback on a transaction that is no longer open
    NotActive,
    /// The transaction belongs to a different connection
    ForeignTransaction,
}

/// Errors raised by the session layer itself.
///
/// `type_name` names the session type involved (`"Session"`,
/// `"CommittableSession"`) when the error concerns a specific instance.
#[derive(Debug)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
    pub type_name: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    /// A required input was missing or empty
    InvalidArgument,
    /// The operation is not valid in the current state
    InvalidOperation,
    /// The session has already been disposed
    Disposed,
    /// A live session is already registered under the same name
    AlreadyExists,
    /// No session is registered as current
    NoCurrentSession,
    /// No provider/connection string is configured for the requested name
    NotConfigured,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Render a session name for messages and log fields.
pub fn display_name(name: Option<&str>) -> &str {
    name.unwrap_or("<default>")
}

impl Error {
    /// Using a session after it has been disposed.
    pub fn disposed(type_name: &'static str) -> Self {
        Error::Session(SessionError {
            kind: SessionErrorKind::Disposed,
            message: format!("cannot access a disposed object: {type_name}"),
            type_name: Some(type_name),
        })
    }

    /// A required argument was missing or empty.
    pub fn invalid_argument(argument: &str) -> Self {
        Error::Session(SessionError {
            kind: SessionErrorKind::InvalidArgument,
            message: format!("argument '{argument}' must not be null or empty"),
            type_name: None,
        })
    }

    /// The operation is not valid in the current state.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::Session(SessionError {
            kind: SessionErrorKind::InvalidOperation,
            message: message.into(),
            type_name: None,
        })
    }

    /// A live session is already registered under `name`.
    pub fn already_exists(name: Option<&str>) -> Self {
        Error::Session(SessionError {
            kind: SessionErrorKind::AlreadyExists,
            message: format!(
                "a session named '{}' already exists in the current context; dispose it before creating another",
                display_name(name)
            ),
            type_name: None,
        })
    }

    /// No session is registered as current.
    pub fn no_current_session() -> Self {
        Error::Session(SessionError {
            kind: SessionErrorKind::NoCurrentSession,
            message: "no current session; create one through the session factory first".to_string(),
            type_name: None,
        })
    }

    /// No session with the given name is registered.
    pub fn no_session_named(name: Option<&str>) -> Self {
        Error::Session(SessionError {
            kind: SessionErrorKind::NoCurrentSession,
            message: format!("no session named '{}' in the current context", display_name(name)),
            type_name: None,
        })
    }

    /// Nothing is configured for the requested session name.
    pub fn not_configured(name: Option<&str>) -> Self {
        Error::Session(SessionError {
            kind: SessionErrorKind::NotConfigured,
            message: format!(
                "no provider or connection string configured for session '{}'",
                display_name(name)
            ),
            type_name: None,
        })
    }

    /// The session-layer error kind, if this is a session error.
    pub fn session_error_kind(&self) -> Option<SessionErrorKind> {
        match self {
            Error::Session(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Is this the error raised when touching a disposed session?
    pub fn is_disposed(&self) -> bool {
        self.session_error_kind() == Some(SessionErrorKind::Disposed)
    }

    /// Is this a duplicate ambient registration?
    pub fn is_already_exists(&self) -> bool {
        self.session_error_kind() == Some(SessionErrorKind::AlreadyExists)
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Session(e) => write!(f, "Session error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        Error::Session(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for SQLSession operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposed_error_carries_type_name() {
        let err = Error::disposed("CommittableSession");
        assert!(err.is_disposed());
        match &err {
            Error::Session(e) => assert_eq!(e.type_name, Some("CommittableSession")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("CommittableSession"));
    }

    #[test]
    fn session_error_kinds() {
        assert_eq!(
            Error::already_exists(Some("reports")).session_error_kind(),
            Some(SessionErrorKind::AlreadyExists)
        );
        assert!(Error::already_exists(None).is_already_exists());
        assert!(Error::already_exists(None).to_string().contains("<default>"));
        assert_eq!(
            Error::not_configured(Some("audit")).session_error_kind(),
            Some(SessionErrorKind::NotConfigured)
        );
        assert_eq!(
            Error::no_current_session().session_error_kind(),
            Some(SessionErrorKind::NoCurrentSession)
        );
        assert_eq!(Error::Cancelled.session_error_kind(), None);
    }

    #[test]
    fn query_error_exposes_sql() {
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            sql: Some("SELEC 1".to_string()),
            message: "near \"SELEC\": syntax error".to_string(),
            source: None,
        });
        assert_eq!(err.sql(), Some("SELEC 1"));
        assert!(!err.is_disposed());
    }

    #[test]
    fn type_error_display_mentions_column() {
        let err = TypeError {
            expected: "i64",
            actual: "TEXT".to_string(),
            column: Some("id".to_string()),
        };
        assert_eq!(err.to_string(), "expected i64 for column 'id', found TEXT");
    }
}
