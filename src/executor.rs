//! Statement execution over `may_postgres`.
//!
//! The bootstrap only needs a narrow view of the database: run a statement,
//! and read back a single text column (constraint names, table names). The
//! [`SqlExecutor`] trait is that view; [`PostgresExecutor`] implements it for a
//! live client, and the simulated database in `test_helpers` implements it for
//! tests.

use may_postgres::types::ToSql;
use may_postgres::{Client, Error as PostgresError};
#[cfg(feature = "metrics")]
use std::time::Instant;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::telemetry;

/// Errors raised while talking to the database
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `PostgreSQL` error from `may_postgres`
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] PostgresError),
    /// The statement was rejected (used by non-Postgres executors)
    #[error("Query error: {0}")]
    Query(String),
    /// Row decoding failed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Anything else
    #[error("Execution error: {0}")]
    Other(String),
}

/// Trait for executing bootstrap statements
///
/// Implementations must run statements sequentially on a single session:
/// transactions and savepoints opened through one call are visible to the next.
pub trait SqlExecutor {
    /// Execute a statement and return the number of rows affected
    ///
    /// DDL statements report `0`.
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError>;

    /// Run a query and return the first column of every row as text
    ///
    /// Queries should cast the column with `::text` so that `name` and
    /// `information_schema` domain types decode as strings.
    fn query_strings(
        &self,
        query: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<String>, DbError>;
}

/// [`SqlExecutor`] backed by a `may_postgres::Client`
pub struct PostgresExecutor {
    client: Client,
}

impl PostgresExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn into_client(self) -> Client {
        self.client
    }

    /// Run `SELECT 1` against the session
    pub fn check_health(&self) -> Result<bool, DbError> {
        crate::connection::check_connection_health(&self.client)
            .map_err(|e| DbError::Other(format!("Health check error: {e}")))
    }
}

impl SqlExecutor for PostgresExecutor {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError> {
        #[cfg(feature = "tracing")]
        let _span = telemetry::statement_span(query).entered();

        #[cfg(feature = "metrics")]
        let start = Instant::now();
        let result = self.client.execute(query, params).map_err(|e| {
            #[cfg(feature = "metrics")]
            METRICS.record_statement_error();
            DbError::from(e)
        });

        #[cfg(feature = "metrics")]
        METRICS.record_statement_duration(start.elapsed());
        result
    }

    fn query_strings(
        &self,
        query: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<String>, DbError> {
        #[cfg(feature = "tracing")]
        let _span = telemetry::statement_span(query).entered();

        #[cfg(feature = "metrics")]
        let start = Instant::now();
        let rows = self.client.query(query, params).map_err(|e| {
            #[cfg(feature = "metrics")]
            METRICS.record_statement_error();
            DbError::from(e)
        });

        #[cfg(feature = "metrics")]
        METRICS.record_statement_duration(start.elapsed());
        let rows = rows?;

        rows.iter()
            .map(|row| {
                row.try_get::<usize, String>(0)
                    .map_err(|e| DbError::Parse(format!("expected a text column: {e}")))
            })
            .collect()
    }
}
