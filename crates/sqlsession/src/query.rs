//! Query surface.
//!
//! Every command runs on the session's connection and, until it has been
//! committed or rolled back, inside the session's transaction. SQL text is
//! validated before any I/O; a disposed session fails with the disposed
//! error.

use crate::session::Session;
use asupersync::{Cx, Outcome};
use sqlsession_core::{
    CommandOptions, DbConnection, Error, FromRow, FromValue, Query, Row, RowDeserializer,
    TypeDeserializer, Value, deserialize_all,
};

impl<C: DbConnection> Session<C> {
    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<u64, Error> {
        let query = match Query::with_params(sql, params.to_vec()) {
            Ok(query) => query,
            Err(e) => return Outcome::Err(e),
        };
        self.execute_with(cx, &query, &CommandOptions::default()).await
    }

    /// Run a query and return every row.
    pub async fn query(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<Vec<Row>, Error> {
        let query = match Query::with_params(sql, params.to_vec()) {
            Ok(query) => query,
            Err(e) => return Outcome::Err(e),
        };
        self.fetch_with(cx, &query, &CommandOptions::default()).await
    }

    /// Run a query and return its first row, if any.
    pub async fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Option<Row>, Error> {
        match self.query(cx, sql, params).await {
            Outcome::Ok(rows) => Outcome::Ok(rows.into_iter().next()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Run a query and convert the first column of the first row.
    ///
    /// `None` when the query returned no rows.
    pub async fn query_scalar<T: FromValue>(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Option<T>, Error> {
        let row = match self.query_one(cx, sql, params).await {
            Outcome::Ok(Some(row)) => row,
            Outcome::Ok(None) => return Outcome::Ok(None),
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match row.get_as::<T>(0) {
            Ok(value) => Outcome::Ok(Some(value)),
            Err(e) => Outcome::Err(e),
        }
    }

    /// Execute a prepared descriptor.
    pub async fn execute_query(&self, cx: &Cx, query: &Query) -> Outcome<u64, Error> {
        self.execute_with(cx, query, &CommandOptions::default()).await
    }

    /// Fetch every row of a prepared descriptor.
    pub async fn fetch(&self, cx: &Cx, query: &Query) -> Outcome<Vec<Row>, Error> {
        self.fetch_with(cx, query, &CommandOptions::default()).await
    }

    pub async fn execute_with(
        &self,
        cx: &Cx,
        query: &Query,
        options: &CommandOptions,
    ) -> Outcome<u64, Error> {
        let (connection, transaction) = match self.command_target() {
            Ok(target) => target,
            Err(e) => return Outcome::Err(e),
        };
        tracing::trace!(
            session_id = %self.id(),
            sql = %query.sql(),
            params = query.params().len(),
            in_transaction = transaction.is_some(),
            "Execute"
        );
        connection
            .execute(cx, query, transaction.as_deref(), options)
            .await
    }

    pub async fn fetch_with(
        &self,
        cx: &Cx,
        query: &Query,
        options: &CommandOptions,
    ) -> Outcome<Vec<Row>, Error> {
        let (connection, transaction) = match self.command_target() {
            Ok(target) => target,
            Err(e) => return Outcome::Err(e),
        };
        tracing::trace!(
            session_id = %self.id(),
            sql = %query.sql(),
            params = query.params().len(),
            in_transaction = transaction.is_some(),
            "Query"
        );
        connection
            .query(cx, query, transaction.as_deref(), options)
            .await
    }

    /// Run a query and build a `T` from every row.
    pub async fn query_as<T: FromRow>(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Vec<T>, Error> {
        self.query_with(cx, sql, params, &RowDeserializer::<T>::new())
            .await
    }

    /// Run a query and convert every row with `deserializer`.
    pub async fn query_with<T, D>(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
        deserializer: &D,
    ) -> Outcome<Vec<T>, Error>
    where
        D: TypeDeserializer<T> + ?Sized,
    {
        let rows = match self.query(cx, sql, params).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match deserialize_all(deserializer, &rows) {
            Ok(values) => Outcome::Ok(values),
            Err(e) => Outcome::Err(e),
        }
    }
}
