//! Bootstrap error types
//!
//! Two kinds of failure stop a bootstrap before any DDL runs: an unreadable
//! catalog and dangling foreign-key references. Connection and lock problems
//! stop it at startup. Everything else is reported, never raised: a failed
//! statement becomes a [`StatementExecutionError`] in the report, and a failed
//! seed step a [`SeedStepError`] logged as a warning.

use std::fmt;
use std::path::PathBuf;

use crate::connection::ConnectionError;
use crate::executor::DbError;
use crate::schema::ddl::{DdlPhase, StatementKind};
use crate::schema::error::{CatalogLoadError, SchemaConsistencyError};
use crate::transaction::TransactionError;

use super::state::{BootstrapPhase, FailedStage};

/// Fatal bootstrap errors
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    CatalogLoad(#[from] CatalogLoadError),
    #[error(transparent)]
    SchemaConsistency(#[from] SchemaConsistencyError),
    #[error("Connection failed: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Bootstrap lock timeout: {0}")]
    LockTimeout(String),
    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl BootstrapError {
    /// Phase the state machine ends in for this error, if it is a validation failure
    pub fn failed_phase(&self) -> Option<BootstrapPhase> {
        match self {
            BootstrapError::CatalogLoad(_) => Some(BootstrapPhase::Failed(FailedStage::CatalogLoad)),
            BootstrapError::SchemaConsistency(_) => {
                Some(BootstrapPhase::Failed(FailedStage::Consistency))
            }
            _ => None,
        }
    }
}

/// A single statement the database rejected
///
/// Recorded in the report; the phase carries on with the next statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementExecutionError {
    pub phase: DdlPhase,
    /// `None` for transaction control (`BEGIN`/`COMMIT`) failures
    pub kind: Option<StatementKind>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub sql: String,
    pub error: String,
}

impl fmt::Display for StatementExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.phase)?;
        match (&self.table, &self.column) {
            (Some(table), Some(column)) => write!(f, " {table}.{column}")?,
            (Some(table), None) => write!(f, " {table}")?,
            _ => {}
        }
        write!(f, ": {} -- {}", self.error, self.sql)
    }
}

impl std::error::Error for StatementExecutionError {}

/// The post-bootstrap seed step failed
#[derive(Debug, thiserror::Error)]
pub enum SeedStepError {
    #[error("Seed directory {} is not readable: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Seed file {} is invalid: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Seed file {} names column '{column}' which table '{table}' does not have", path.display())]
    UnknownColumn {
        path: PathBuf,
        table: String,
        column: String,
    },
    #[error("Failed to start seed command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Seed command '{program}' exited with {status}")]
    Command { program: String, status: String },
    #[error("Seed command is empty")]
    EmptyCommand,
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Database(#[from] DbError),
}
