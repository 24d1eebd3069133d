//! Errors raised while loading and validating a catalog

use std::fmt;
use std::path::PathBuf;

/// The catalog source could not be read at all
///
/// Individual malformed rows never produce this error; they are skipped
/// with a warning by the loader.
#[derive(Debug, thiserror::Error)]
pub enum CatalogLoadError {
    #[error("Failed to read catalog {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid CSV catalog: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid JSON catalog: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Catalog header has no '{0}' column")]
    MissingHeader(&'static str),
}

/// Why a foreign-key reference could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DanglingReason {
    /// Not of the form `<table>(<column>)`
    Malformed,
    MissingTable(String),
    MissingColumn { table: String, column: String },
}

/// One foreign-key reference that points outside the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    pub table: String,
    pub column: String,
    pub reference: String,
    pub reason: DanglingReason,
}

impl fmt::Display for DanglingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} references '{}': ", self.table, self.column, self.reference)?;
        match &self.reason {
            DanglingReason::Malformed => write!(f, "expected <table>(<column>)"),
            DanglingReason::MissingTable(table) => {
                write!(f, "table '{table}' is not in the catalog")
            }
            DanglingReason::MissingColumn { table, column } => {
                write!(f, "table '{table}' has no column '{column}'")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedNameKind {
    Constraint,
    View,
}

/// Two catalog objects whose derived names the server would treat as one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameConflict {
    pub kind: DerivedNameKind,
    pub name: String,
    /// Object that claimed the name first
    pub first: String,
    pub second: String,
}

impl fmt::Display for NameConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            DerivedNameKind::Constraint => "constraint",
            DerivedNameKind::View => "view",
        };
        write!(
            f,
            "{kind} name '{}' for {} is already used by {}",
            self.name, self.second, self.first
        )
    }
}

/// The catalog references tables or columns it does not define, or derives
/// the same object name twice
///
/// Every problem in the catalog is reported, not only the first.
#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
pub struct SchemaConsistencyError {
    pub dangling: Vec<DanglingReference>,
    pub name_conflicts: Vec<NameConflict>,
}

impl fmt::Display for SchemaConsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Catalog has {} dangling foreign-key reference(s)",
            self.dangling.len()
        )?;
        if !self.name_conflicts.is_empty() {
            write!(f, " and {} conflicting name(s)", self.name_conflicts.len())?;
        }
        for item in &self.dangling {
            write!(f, "\n  - {item}")?;
        }
        for conflict in &self.name_conflicts {
            write!(f, "\n  - {conflict}")?;
        }
        Ok(())
    }
}
