//! Counting mock driver shared by the unit tests.

use asupersync::{Cx, Outcome};
use sqlsession_core::error::{ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind};
use sqlsession_core::{
    CommandOptions, DbConnection, DbTransaction, Error, IsolationLevel, ProviderFactory, Query,
    Result, Row,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub opens: usize,
    pub closes: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub transaction_closes: usize,
    pub dropped_connections: usize,
    pub dropped_transactions: usize,
    pub events: Vec<&'static str>,
    pub last_isolation: Option<IsolationLevel>,
    /// (sql, params, ran inside a transaction)
    pub executed: Vec<(String, usize, bool)>,
    pub last_options: Option<CommandOptions>,
    pub rows: Vec<Row>,
    pub fail_open: bool,
    pub fail_begin: bool,
    pub fail_commit: bool,
    pub no_connection: bool,
}

fn cancelled<T>(cx: &Cx) -> Option<Outcome<T, Error>> {
    if !cx.is_cancel_requested() {
        return None;
    }
    Some(match cx.cancel_reason() {
        Some(reason) => Outcome::Cancelled(reason),
        None => Outcome::Err(Error::Cancelled),
    })
}

fn state_lock(state: &Arc<Mutex<MockState>>) -> std::sync::MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub(crate) struct MockProvider {
    pub state: Arc<Mutex<MockState>>,
}

impl MockProvider {
    pub fn new(state: &Arc<Mutex<MockState>>) -> Self {
        Self {
            state: Arc::clone(state),
        }
    }
}

impl ProviderFactory for MockProvider {
    type Connection = MockConnection;

    fn name(&self) -> &str {
        "mock"
    }

    fn create_connection(&self) -> Option<MockConnection> {
        if state_lock(&self.state).no_connection {
            return None;
        }
        Some(MockConnection::new(&self.state))
    }
}

pub(crate) fn mock_connection(state: &Arc<Mutex<MockState>>) -> MockConnection {
    let mut connection = MockConnection::new(state);
    connection.connection_string = "mock://test".to_string();
    connection
}

#[derive(Debug)]
pub(crate) struct MockConnection {
    state: Arc<Mutex<MockState>>,
    connection_string: String,
    open: AtomicBool,
    closed: AtomicBool,
}

impl MockConnection {
    fn new(state: &Arc<Mutex<MockState>>) -> Self {
        Self {
            state: Arc::clone(state),
            connection_string: String::new(),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn transaction_for_test(&self, isolation: IsolationLevel) -> MockTransaction {
        MockTransaction {
            state: Arc::clone(&self.state),
            isolation,
            closed: AtomicBool::new(false),
        }
    }

    fn record(&self, sql: &Query, in_transaction: bool, options: &CommandOptions) {
        let mut state = state_lock(&self.state);
        state
            .executed
            .push((sql.sql().to_string(), sql.params().len(), in_transaction));
        state.last_options = Some(*options);
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        state_lock(&self.state).dropped_connections += 1;
    }
}

impl DbConnection for MockConnection {
    type Transaction = MockTransaction;

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn set_connection_string(&mut self, connection_string: &str) -> Result<()> {
        if connection_string.is_empty() {
            return Err(Error::invalid_argument("connection_string"));
        }
        self.connection_string = connection_string.to_string();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn open(&self, cx: &Cx) -> Outcome<(), Error> {
        if let Some(outcome) = cancelled(cx) {
            return outcome;
        }
        let mut state = state_lock(&self.state);
        state.opens += 1;
        if state.fail_open {
            return Outcome::Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "mock open failure".to_string(),
                source: None,
            }));
        }
        self.open.store(true, Ordering::Release);
        Outcome::Ok(())
    }

    async fn begin_transaction(
        &self,
        cx: &Cx,
        isolation: IsolationLevel,
    ) -> Outcome<MockTransaction, Error> {
        if let Some(outcome) = cancelled(cx) {
            return outcome;
        }
        {
            let mut state = state_lock(&self.state);
            state.begins += 1;
            state.last_isolation = Some(isolation);
            if state.fail_begin {
                return Outcome::Err(Error::Custom("mock begin failure".to_string()));
            }
        }
        Outcome::Ok(self.transaction_for_test(isolation))
    }

    async fn query(
        &self,
        cx: &Cx,
        query: &Query,
        transaction: Option<&MockTransaction>,
        options: &CommandOptions,
    ) -> Outcome<Vec<Row>, Error> {
        if let Some(outcome) = cancelled(cx) {
            return outcome;
        }
        self.record(query, transaction.is_some(), options);
        if query.sql().contains("FAIL") {
            return Outcome::Err(Error::Query(QueryError {
                kind: QueryErrorKind::Syntax,
                sql: Some(query.sql().to_string()),
                message: "mock syntax error".to_string(),
                source: None,
            }));
        }
        Outcome::Ok(state_lock(&self.state).rows.clone())
    }

    async fn execute(
        &self,
        cx: &Cx,
        query: &Query,
        transaction: Option<&MockTransaction>,
        options: &CommandOptions,
    ) -> Outcome<u64, Error> {
        if let Some(outcome) = cancelled(cx) {
            return outcome;
        }
        self.record(query, transaction.is_some(), options);
        Outcome::Ok(1)
    }

    async fn close(&self, _cx: &Cx) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.open.store(false, Ordering::Release);
        let mut state = state_lock(&self.state);
        state.closes += 1;
        state.events.push("connection_close");
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct MockTransaction {
    state: Arc<Mutex<MockState>>,
    isolation: IsolationLevel,
    closed: AtomicBool,
}

impl Drop for MockTransaction {
    fn drop(&mut self) {
        state_lock(&self.state).dropped_transactions += 1;
    }
}

impl DbTransaction for MockTransaction {
    fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    async fn commit(&self, cx: &Cx) -> Outcome<(), Error> {
        if let Some(outcome) = cancelled(cx) {
            return outcome;
        }
        let mut state = state_lock(&self.state);
        if state.fail_commit {
            return Outcome::Err(Error::Custom("mock commit failure".to_string()));
        }
        state.commits += 1;
        state.events.push("commit");
        Outcome::Ok(())
    }

    async fn rollback(&self, cx: &Cx) -> Outcome<(), Error> {
        if let Some(outcome) = cancelled(cx) {
            return outcome;
        }
        let mut state = state_lock(&self.state);
        state.rollbacks += 1;
        state.events.push("rollback");
        Outcome::Ok(())
    }

    async fn close(&self, _cx: &Cx) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = state_lock(&self.state);
        state.transaction_closes += 1;
        state.events.push("transaction_close");
        Ok(())
    }
}
