//! Connection-string parsing.
//!
//! Two forms are accepted:
//!
//! - a bare path, or `:memory:`
//! - `key=value` pairs separated by `;`, e.g.
//!   `path=/var/lib/app.db; mode=rwc; busy_timeout=2500`
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `path`, `data source`, `filename` | database file |
//! | `mode` | `ro`, `rw`, `rwc` (default) or `memory` |
//! | `busy_timeout` | milliseconds to wait on a locked database |

#![allow(clippy::result_large_err)]

use crate::ffi;
use sqlsession_core::Error;
use sqlsession_core::error::{ConnectionError, ConnectionErrorKind};
use std::ffi::c_int;

pub const MEMORY_PATH: &str = ":memory:";

const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

/// How the database file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
    /// Read-write, creating the file if needed.
    #[default]
    ReadWriteCreate,
    Memory,
}

impl OpenMode {
    pub(crate) fn to_sqlite_flags(self) -> c_int {
        let base = match self {
            OpenMode::ReadOnly => ffi::SQLITE_OPEN_READONLY,
            OpenMode::ReadWrite => ffi::SQLITE_OPEN_READWRITE,
            OpenMode::ReadWriteCreate => ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE,
            OpenMode::Memory => {
                ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE | ffi::SQLITE_OPEN_MEMORY
            }
        };
        base | ffi::SQLITE_OPEN_FULLMUTEX
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "ro" | "readonly" => Some(OpenMode::ReadOnly),
            "rw" | "readwrite" => Some(OpenMode::ReadWrite),
            "rwc" | "readwritecreate" => Some(OpenMode::ReadWriteCreate),
            "memory" => Some(OpenMode::Memory),
            _ => None,
        }
    }
}

/// Parsed SQLite connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    /// Path to the database file, or `:memory:`.
    pub path: String,
    pub mode: OpenMode,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self::memory()
    }
}

impl SqliteConfig {
    /// A file-backed database, created if missing.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: OpenMode::ReadWriteCreate,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }

    /// A private in-memory database.
    pub fn memory() -> Self {
        Self {
            path: MEMORY_PATH.to_string(),
            mode: OpenMode::Memory,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }

    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    /// Parse a connection string.
    pub fn parse(connection_string: &str) -> Result<Self, Error> {
        let trimmed = connection_string.trim();
        if trimmed.is_empty() {
            return Err(invalid("connection string is empty"));
        }
        if !trimmed.contains('=') {
            return Ok(if trimmed == MEMORY_PATH {
                Self::memory()
            } else {
                Self::file(trimmed)
            });
        }

        let mut path: Option<String> = None;
        let mut mode: Option<OpenMode> = None;
        let mut busy_timeout_ms = DEFAULT_BUSY_TIMEOUT_MS;

        for pair in trimmed.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(invalid(&format!("expected key=value, got '{pair}'")));
            };
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "path" | "data source" | "datasource" | "filename" => {
                    path = Some(value.to_string());
                }
                "mode" => {
                    mode = Some(
                        OpenMode::parse(value)
                            .ok_or_else(|| invalid(&format!("unknown mode '{value}'")))?,
                    );
                }
                "busy_timeout" | "busy timeout" => {
                    busy_timeout_ms = value
                        .parse()
                        .map_err(|_| invalid(&format!("invalid busy_timeout '{value}'")))?;
                }
                other => return Err(invalid(&format!("unknown key '{other}'"))),
            }
        }

        let config = match (path, mode) {
            (Some(path), _) if path == MEMORY_PATH => Self::memory(),
            (Some(path), Some(mode)) => Self::file(path).mode(mode),
            (Some(path), None) => Self::file(path),
            (None, Some(OpenMode::Memory)) => Self::memory(),
            (None, _) => return Err(invalid("missing 'path'")),
        };
        Ok(config.busy_timeout(busy_timeout_ms))
    }

    pub fn is_memory(&self) -> bool {
        self.mode == OpenMode::Memory || self.path == MEMORY_PATH
    }
}

fn invalid(message: &str) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::InvalidConnectionString,
        message: format!("Invalid SQLite connection string: {message}"),
        source: None,
    })
}
