//! SQLite implementation of the driver contract.
//!
//! A [`SqliteConnection`] is created unopened by [`SqliteProvider`], gets its
//! connection string, and opens on demand. The raw handle lives behind a
//! mutex shared with every [`SqliteTransaction`] begun on the connection, so
//! a transaction can roll itself back when it is closed or dropped without
//! having been committed.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::result_large_err)] // Error type is defined in sqlsession-core
#![allow(clippy::borrow_as_ptr)] // FFI requires raw pointers

use crate::config::SqliteConfig;
use crate::ffi;
use crate::types;
use asupersync::{Cx, Outcome};
use sqlsession_core::error::{
    ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind, TransactionError,
    TransactionErrorKind,
};
use sqlsession_core::{
    ColumnInfo, CommandKind, CommandOptions, DbConnection, DbTransaction, Error, IsolationLevel,
    ProviderFactory, Query, Row, Value,
};
use std::ffi::{CStr, CString, c_int};
use std::future::Future;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Creates unopened [`SqliteConnection`]s.
#[derive(Debug, Clone, Default)]
pub struct SqliteProvider;

impl SqliteProvider {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderFactory for SqliteProvider {
    type Connection = SqliteConnection;

    fn name(&self) -> &str {
        "sqlite"
    }

    fn create_connection(&self) -> Option<SqliteConnection> {
        Some(SqliteConnection::new())
    }
}

/// Inner state of the SQLite connection, protected by a mutex for thread safety.
struct SqliteInner {
    db: *mut ffi::sqlite3,
    in_transaction: bool,
    busy_timeout_ms: u32,
    path: Option<String>,
}

// SAFETY: the handle is opened in serialized mode and only touched with the
// surrounding mutex held.
unsafe impl Send for SqliteInner {}

impl SqliteInner {
    fn open_db(&self) -> Result<*mut ffi::sqlite3, Error> {
        if self.db.is_null() {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::NotOpen,
                message: "SQLite connection is not open".to_string(),
                source: None,
            }));
        }
        Ok(self.db)
    }

    fn close_db(&mut self) {
        if !self.db.is_null() {
            // SAFETY: db is a valid handle owned by this struct; close_v2
            // rolls back any open transaction and defers until statements finalize
            unsafe {
                ffi::sqlite3_close_v2(self.db);
            }
            self.db = ptr::null_mut();
            self.in_transaction = false;
        }
    }
}

type Shared = Arc<Mutex<SqliteInner>>;

fn lock(shared: &Shared) -> MutexGuard<'_, SqliteInner> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A connection to a SQLite database.
pub struct SqliteConnection {
    shared: Shared,
    connection_string: String,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("connection_string", &self.connection_string)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Default for SqliteConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteConnection {
    /// An unopened connection with no connection string.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(SqliteInner {
                db: ptr::null_mut(),
                in_transaction: false,
                busy_timeout_ms: 0,
                path: None,
            })),
            connection_string: String::new(),
        }
    }

    /// Path of the opened database, `None` while closed.
    pub fn path(&self) -> Option<String> {
        lock(&self.shared).path.clone()
    }

    /// Whether a transaction is currently open on this connection.
    pub fn in_transaction(&self) -> bool {
        lock(&self.shared).in_transaction
    }

    /// Execute SQL directly without preparing (DDL, multi-statement scripts).
    pub fn execute_raw(&self, sql: &str) -> Result<(), Error> {
        let inner = lock(&self.shared);
        exec(inner.open_db()?, sql)
    }

    /// Rowid of the most recent successful INSERT.
    pub fn last_insert_rowid(&self) -> Result<i64, Error> {
        let inner = lock(&self.shared);
        let db = inner.open_db()?;
        // SAFETY: db is valid while the lock is held
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(db) })
    }

    fn open_sync(&self) -> Result<(), Error> {
        let config = SqliteConfig::parse(&self.connection_string)?;
        let mut inner = lock(&self.shared);
        if !inner.db.is_null() {
            return Ok(());
        }

        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::InvalidConnectionString,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;
        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.mode.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };
        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is valid even though open failed; it must be closed
                unsafe {
                    let msg = ffi::last_error_message(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database '{}': {}", config.path, msg),
                source: None,
            }));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, clamp_ms(config.busy_timeout_ms));
            }
        }

        inner.db = db;
        inner.in_transaction = false;
        inner.busy_timeout_ms = config.busy_timeout_ms;
        inner.path = Some(config.path.clone());
        tracing::debug!(path = %config.path, mode = ?config.mode, "Opened SQLite database");
        Ok(())
    }

    fn begin_sync(&self, isolation: IsolationLevel) -> Result<SqliteTransaction, Error> {
        let mut inner = lock(&self.shared);
        let db = inner.open_db()?;
        if inner.in_transaction {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::AlreadyActive,
                message: "Already in a transaction".to_string(),
            }));
        }

        let begin_sql = begin_statement(isolation);
        exec(db, begin_sql)?;
        inner.in_transaction = true;
        tracing::trace!(sql = begin_sql, "Transaction started");

        Ok(SqliteTransaction {
            shared: Arc::clone(&self.shared),
            isolation,
            finished: AtomicBool::new(false),
        })
    }

    /// Check that `transaction` (if any) is live and belongs to this
    /// connection.
    fn check_transaction(&self, transaction: Option<&SqliteTransaction>) -> Result<(), Error> {
        let Some(transaction) = transaction else {
            return Ok(());
        };
        if !Arc::ptr_eq(&transaction.shared, &self.shared) {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::ForeignTransaction,
                message: "Transaction was begun on a different connection".to_string(),
            }));
        }
        if transaction.is_finished() {
            return Err(not_active());
        }
        Ok(())
    }

    /// Run `body` with the handle locked and the command timeout applied.
    fn with_command<T>(
        &self,
        query: &Query,
        transaction: Option<&SqliteTransaction>,
        options: &CommandOptions,
        body: impl FnOnce(*mut ffi::sqlite3) -> Result<T, Error>,
    ) -> Result<T, Error> {
        if options.kind == CommandKind::StoredProcedure {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Unsupported,
                sql: Some(query.sql().to_string()),
                message: "SQLite does not support stored procedures".to_string(),
                source: None,
            }));
        }
        self.check_transaction(transaction)?;

        let inner = lock(&self.shared);
        let db = inner.open_db()?;
        let Some(timeout) = options.timeout else {
            return body(db);
        };

        let ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        // SAFETY: db is valid while the lock is held
        unsafe {
            ffi::sqlite3_busy_timeout(db, clamp_ms(ms));
        }
        let result = body(db);
        // SAFETY: as above
        unsafe {
            ffi::sqlite3_busy_timeout(db, clamp_ms(inner.busy_timeout_ms));
        }
        result
    }

    fn query_sync(
        &self,
        query: &Query,
        transaction: Option<&SqliteTransaction>,
        options: &CommandOptions,
    ) -> Result<Vec<Row>, Error> {
        self.with_command(query, transaction, options, |db| {
            let stmt = Statement::prepare(db, query.sql())?;
            stmt.bind_all(query.sql(), query.params())?;

            let col_count = stmt.column_count();
            let mut col_names = Vec::with_capacity(col_count as usize);
            for i in 0..col_count {
                // SAFETY: stmt is valid, i is in range
                let name =
                    unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{i}"));
                col_names.push(name);
            }
            let columns = Arc::new(ColumnInfo::new(col_names));

            let mut rows = Vec::new();
            loop {
                match stmt.step() {
                    ffi::SQLITE_ROW => {
                        let mut values = Vec::with_capacity(col_count as usize);
                        for i in 0..col_count {
                            // SAFETY: stmt is valid, we just got SQLITE_ROW
                            values.push(unsafe { types::read_column(stmt.raw, i) });
                        }
                        rows.push(Row::with_columns(Arc::clone(&columns), values));
                    }
                    ffi::SQLITE_DONE => break,
                    _ => return Err(step_error(db, query.sql())),
                }
            }
            Ok(rows)
        })
    }

    fn execute_sync(
        &self,
        query: &Query,
        transaction: Option<&SqliteTransaction>,
        options: &CommandOptions,
    ) -> Result<u64, Error> {
        self.with_command(query, transaction, options, |db| {
            let stmt = Statement::prepare(db, query.sql())?;
            stmt.bind_all(query.sql(), query.params())?;
            match stmt.step() {
                ffi::SQLITE_DONE | ffi::SQLITE_ROW => {
                    // SAFETY: db is valid
                    let changes = unsafe { ffi::sqlite3_changes(db) };
                    Ok(u64::try_from(changes).unwrap_or(0))
                }
                _ => Err(step_error(db, query.sql())),
            }
        })
    }

    fn close_sync(&self) {
        let mut inner = lock(&self.shared);
        if !inner.db.is_null() {
            tracing::debug!(path = ?inner.path, "Closing SQLite database");
        }
        inner.close_db();
        inner.path = None;
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        self.close_sync();
    }
}

impl DbConnection for SqliteConnection {
    type Transaction = SqliteTransaction;

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn set_connection_string(&mut self, connection_string: &str) -> Result<(), Error> {
        if connection_string.trim().is_empty() {
            return Err(Error::invalid_argument("connection_string"));
        }
        if self.is_open() {
            return Err(Error::invalid_operation(
                "cannot change the connection string of an open connection",
            ));
        }
        self.connection_string = connection_string.to_string();
        Ok(())
    }

    fn is_open(&self) -> bool {
        !lock(&self.shared).db.is_null()
    }

    fn open(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let outcome = match cancelled(cx) {
            Some(outcome) => outcome,
            None => self.open_sync().map_or_else(Outcome::Err, Outcome::Ok),
        };
        async move { outcome }
    }

    fn begin_transaction(
        &self,
        cx: &Cx,
        isolation: IsolationLevel,
    ) -> impl Future<Output = Outcome<SqliteTransaction, Error>> + Send {
        let outcome = match cancelled(cx) {
            Some(outcome) => outcome,
            None => self.begin_sync(isolation).map_or_else(Outcome::Err, Outcome::Ok),
        };
        async move { outcome }
    }

    fn query(
        &self,
        cx: &Cx,
        query: &Query,
        transaction: Option<&SqliteTransaction>,
        options: &CommandOptions,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let outcome = match cancelled(cx) {
            Some(outcome) => outcome,
            None => self
                .query_sync(query, transaction, options)
                .map_or_else(Outcome::Err, Outcome::Ok),
        };
        async move { outcome }
    }

    fn execute(
        &self,
        cx: &Cx,
        query: &Query,
        transaction: Option<&SqliteTransaction>,
        options: &CommandOptions,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let outcome = match cancelled(cx) {
            Some(outcome) => outcome,
            None => self
                .execute_sync(query, transaction, options)
                .map_or_else(Outcome::Err, Outcome::Ok),
        };
        async move { outcome }
    }

    async fn close(&self, _cx: &Cx) -> Result<(), Error> {
        self.close_sync();
        Ok(())
    }
}

/// A SQLite transaction.
///
/// Closing or dropping a transaction that was neither committed nor rolled
/// back rolls it back.
pub struct SqliteTransaction {
    shared: Shared,
    isolation: IsolationLevel,
    finished: AtomicBool,
}

impl std::fmt::Debug for SqliteTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTransaction")
            .field("isolation", &self.isolation)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl SqliteTransaction {
    /// Whether the transaction has been committed, rolled back, or closed.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn finish_sync(&self, sql: &'static str) -> Result<(), Error> {
        let mut inner = lock(&self.shared);
        if self.is_finished() || !inner.in_transaction {
            return Err(not_active());
        }
        let db = inner.open_db()?;
        exec(db, sql)?;
        inner.in_transaction = false;
        self.finished.store(true, Ordering::Release);
        tracing::trace!(sql, "Transaction finished");
        Ok(())
    }

    /// Roll back if still pending. Used by close and drop.
    fn abandon(&self) -> Result<(), Error> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut inner = lock(&self.shared);
        if !inner.in_transaction || inner.db.is_null() {
            return Ok(());
        }
        inner.in_transaction = false;
        tracing::debug!("Rolling back unfinished transaction");
        exec(inner.db, "ROLLBACK")
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if let Err(e) = self.abandon() {
            tracing::warn!(error = %e, "Rollback of dropped transaction failed");
        }
    }
}

impl DbTransaction for SqliteTransaction {
    fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let outcome = match cancelled(cx) {
            Some(outcome) => outcome,
            None => self.finish_sync("COMMIT").map_or_else(Outcome::Err, Outcome::Ok),
        };
        async move { outcome }
    }

    fn rollback(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let outcome = match cancelled(cx) {
            Some(outcome) => outcome,
            None => self.finish_sync("ROLLBACK").map_or_else(Outcome::Err, Outcome::Ok),
        };
        async move { outcome }
    }

    async fn close(&self, _cx: &Cx) -> Result<(), Error> {
        self.abandon()
    }
}

// Helper functions

/// Outcome for an operation that must not start because cancellation was
/// requested. A request without a reason maps to `Error::Cancelled`.
fn cancelled<T>(cx: &Cx) -> Option<Outcome<T, Error>> {
    if !cx.is_cancel_requested() {
        return None;
    }
    Some(match cx.cancel_reason() {
        Some(reason) => Outcome::Cancelled(reason),
        None => Outcome::Err(Error::Cancelled),
    })
}

/// SQLite has no isolation levels; the lock taken at BEGIN approximates them.
fn begin_statement(isolation: IsolationLevel) -> &'static str {
    match isolation {
        IsolationLevel::Serializable | IsolationLevel::Snapshot => "BEGIN EXCLUSIVE",
        IsolationLevel::RepeatableRead | IsolationLevel::ReadCommitted => "BEGIN IMMEDIATE",
        IsolationLevel::ReadUncommitted => "BEGIN DEFERRED",
        IsolationLevel::Unspecified => "BEGIN",
    }
}

fn clamp_ms(ms: u32) -> c_int {
    c_int::try_from(ms).unwrap_or(c_int::MAX)
}

fn not_active() -> Error {
    Error::Transaction(TransactionError {
        kind: TransactionErrorKind::NotActive,
        message: "Transaction is no longer active".to_string(),
    })
}

/// Owned prepared statement, finalized on drop.
struct Statement {
    raw: *mut ffi::sqlite3_stmt,
    db: *mut ffi::sqlite3,
}

impl Statement {
    fn prepare(db: *mut ffi::sqlite3, sql: &str) -> Result<Self, Error> {
        let c_sql = CString::new(sql).map_err(|_| null_byte(sql))?;
        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                db,
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut raw,
                ptr::null_mut(),
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(step_error(db, sql));
        }
        if raw.is_null() {
            // whitespace or comment only
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Syntax,
                sql: Some(sql.to_string()),
                message: "SQL contains no statement".to_string(),
                source: None,
            }));
        }
        Ok(Self { raw, db })
    }

    fn bind_all(&self, sql: &str, params: &[Value]) -> Result<(), Error> {
        for (i, param) in params.iter().enumerate() {
            let index = (i + 1) as c_int;
            // SAFETY: raw is valid, index is 1-based
            let rc = unsafe { types::bind_value(self.raw, index, param) };
            if rc != ffi::SQLITE_OK {
                // SAFETY: db is valid
                let msg = unsafe { ffi::last_error_message(self.db) };
                return Err(Error::Query(QueryError {
                    kind: QueryErrorKind::Database,
                    sql: Some(sql.to_string()),
                    message: format!("Failed to bind parameter {}: {}", i + 1, msg),
                    source: None,
                }));
            }
        }
        Ok(())
    }

    fn column_count(&self) -> c_int {
        // SAFETY: raw is valid
        unsafe { ffi::sqlite3_column_count(self.raw) }
    }

    fn step(&self) -> c_int {
        // SAFETY: raw is valid
        unsafe { ffi::sqlite3_step(self.raw) }
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        // SAFETY: raw is valid and finalized exactly once
        unsafe {
            ffi::sqlite3_finalize(self.raw);
        }
    }
}

fn exec(db: *mut ffi::sqlite3, sql: &str) -> Result<(), Error> {
    let c_sql = CString::new(sql).map_err(|_| null_byte(sql))?;
    let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

    // SAFETY: All pointers are valid
    let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };
    if rc == ffi::SQLITE_OK {
        return Ok(());
    }

    let message = if errmsg.is_null() {
        ffi::error_string(rc).to_string()
    } else {
        // SAFETY: errmsg was allocated by SQLite and is freed exactly once
        unsafe {
            let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
            ffi::sqlite3_free(errmsg.cast());
            msg
        }
    };
    Err(Error::Query(QueryError {
        kind: error_code_to_kind(rc),
        sql: Some(sql.to_string()),
        message,
        source: None,
    }))
}

fn null_byte(sql: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Syntax,
        sql: Some(sql.to_string()),
        message: "SQL contains null byte".to_string(),
        source: None,
    })
}

fn step_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (message, code) = unsafe { (ffi::last_error_message(db), ffi::sqlite3_errcode(db)) };
    Error::Query(QueryError {
        kind: error_code_to_kind(code),
        sql: Some(sql.to_string()),
        message,
        source: None,
    })
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        _ => QueryErrorKind::Database,
    }
}
