//! Transactions and savepoints on top of an [`SqlExecutor`].
//!
//! Every bootstrap phase runs in its own transaction, and every statement in
//! a phase runs inside a savepoint. In PostgreSQL a failed statement aborts the
//! enclosing transaction, so rolling back to the savepoint is what lets the
//! phase continue with the next statement.

use crate::executor::{DbError, SqlExecutor};
use may_postgres::types::ToSql;

#[cfg(feature = "tracing")]
use crate::telemetry;

/// Transaction error type
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// Database error while issuing BEGIN/COMMIT/ROLLBACK/SAVEPOINT
    #[error(transparent)]
    Database(#[from] DbError),
    /// Transaction already committed or rolled back
    #[error("Transaction has already been committed or rolled back")]
    TransactionClosed,
}

/// A database transaction bound to one executor
///
/// A transaction that is dropped without [`commit`](Transaction::commit) or
/// [`rollback`](Transaction::rollback) is rolled back.
pub struct Transaction<'a> {
    executor: &'a dyn SqlExecutor,
    savepoints: u32,
    closed: bool,
}

impl<'a> Transaction<'a> {
    /// Issue `BEGIN`
    pub fn begin(executor: &'a dyn SqlExecutor) -> Result<Self, TransactionError> {
        #[cfg(feature = "tracing")]
        let _span = telemetry::transaction_span("begin").entered();

        executor.execute("BEGIN", &[])?;
        Ok(Self {
            executor,
            savepoints: 0,
            closed: false,
        })
    }

    /// Run `sql` inside a fresh savepoint
    ///
    /// On failure the savepoint is rolled back, the transaction stays usable
    /// and the statement error is returned.
    pub fn execute_isolated(&mut self, sql: &str, params: &[&dyn ToSql]) -> Result<u64, DbError> {
        if self.closed {
            return Err(DbError::Other("Transaction is closed".to_string()));
        }

        self.savepoints += 1;
        let savepoint = format!("sp_{}", self.savepoints);
        self.executor.execute(&format!("SAVEPOINT {savepoint}"), &[])?;

        match self.executor.execute(sql, params) {
            Ok(rows) => {
                self.executor
                    .execute(&format!("RELEASE SAVEPOINT {savepoint}"), &[])?;
                Ok(rows)
            }
            Err(err) => {
                if let Err(rollback_err) = self
                    .executor
                    .execute(&format!("ROLLBACK TO SAVEPOINT {savepoint}"), &[])
                {
                    log::error!("Failed to roll back to {savepoint}: {rollback_err}");
                }
                Err(err)
            }
        }
    }

    /// Access the executor for statements that should not get a savepoint
    pub fn executor(&self) -> &'a dyn SqlExecutor {
        self.executor
    }

    /// Issue `COMMIT`
    pub fn commit(mut self) -> Result<(), TransactionError> {
        if self.closed {
            return Err(TransactionError::TransactionClosed);
        }

        #[cfg(feature = "tracing")]
        let _span = telemetry::transaction_span("commit").entered();

        self.closed = true;
        self.executor.execute("COMMIT", &[])?;
        Ok(())
    }

    /// Issue `ROLLBACK`
    pub fn rollback(mut self) -> Result<(), TransactionError> {
        if self.closed {
            return Err(TransactionError::TransactionClosed);
        }

        #[cfg(feature = "tracing")]
        let _span = telemetry::transaction_span("rollback").entered();

        self.closed = true;
        self.executor.execute("ROLLBACK", &[])?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.executor.execute("ROLLBACK", &[]) {
                log::warn!("Rollback of abandoned transaction failed: {e}");
            }
        }
    }
}
