//! Foreign-key reference resolution.
//!
//! A catalog column flagged as a foreign key carries free-text target
//! `<table>(<column>)`. Resolution sorts every flagged column into one of:
//! - resolved: both sides exist, a constraint will be emitted
//! - skipped: empty or polymorphic (`a(id) / b(id)`) reference, warning only
//! - dangling: malformed or pointing outside the catalog, fatal
//!
//! Dangling references are collected across the whole catalog and returned
//! together as a [`SchemaConsistencyError`] before any DDL exists.

use once_cell::sync::Lazy;
use regex::Regex;

use super::catalog::{Catalog, ColumnDescriptor};
use super::error::{DanglingReason, DanglingReference, SchemaConsistencyError};
use super::identifier::bounded_identifier;

/// Separator between alternatives of a polymorphic reference
pub const POLYMORPHIC_SEPARATOR: &str = " / ";

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)$")
        .expect("static regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedForeignKey {
    pub source_table: String,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
}

impl ResolvedForeignKey {
    /// Constraint name `fk_<table>_<column>`, hash-suffixed past 63 bytes
    pub fn constraint_name(&self) -> String {
        bounded_identifier(format!("fk_{}_{}", self.source_table, self.source_column))
    }
}

/// A target column that needs its own UNIQUE constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueRequirement {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyReference,
    Polymorphic,
}

/// A flagged column that gets no database constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedForeignKey {
    pub table: String,
    pub column: String,
    pub reference: String,
    pub reason: SkipReason,
}

/// Result of resolving every foreign key in a catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForeignKeyPlan {
    /// In catalog order
    pub resolved: Vec<ResolvedForeignKey>,
    /// Deduplicated, in order of first reference
    pub unique_requirements: Vec<UniqueRequirement>,
    pub skipped: Vec<SkippedForeignKey>,
}

impl ForeignKeyPlan {
    /// UNIQUE columns required on `table`, in order
    pub fn unique_columns<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.unique_requirements
            .iter()
            .filter(move |u| u.table == table)
            .map(|u| u.column.as_str())
    }
}

pub fn is_polymorphic(reference: &str) -> bool {
    reference.contains(POLYMORPHIC_SEPARATOR)
}

/// Split `table(column)` into its parts
pub fn parse_reference(reference: &str) -> Option<(&str, &str)> {
    let caps = REFERENCE.captures(reference.trim())?;
    let table = caps.get(1)?.as_str();
    let column = caps.get(2)?.as_str();
    Some((table, column))
}

/// Resolve every foreign key in `catalog`
pub fn resolve(catalog: &Catalog) -> Result<ForeignKeyPlan, SchemaConsistencyError> {
    let mut plan = ForeignKeyPlan::default();
    let mut dangling = Vec::new();

    for column in catalog.columns() {
        if !column.is_foreign_key {
            if let Some(reference) = &column.fk_reference {
                log::debug!(
                    "Ignoring reference '{reference}' on {}.{}: column is not flagged as a foreign key",
                    column.table,
                    column.column
                );
            }
            continue;
        }

        match resolve_column(catalog, column) {
            Resolution::Resolved(fk) => {
                let targets_primary_key = catalog
                    .table(&fk.target_table)
                    .is_some_and(|t| t.is_sole_primary_key(&fk.target_column));
                if !targets_primary_key {
                    let requirement = UniqueRequirement {
                        table: fk.target_table.clone(),
                        column: fk.target_column.clone(),
                    };
                    if !plan.unique_requirements.contains(&requirement) {
                        plan.unique_requirements.push(requirement);
                    }
                }
                plan.resolved.push(fk);
            }
            Resolution::Skipped(skipped) => {
                match skipped.reason {
                    SkipReason::EmptyReference => log::warn!(
                        "{}.{} is flagged as a foreign key but has no reference; no constraint will be created",
                        skipped.table,
                        skipped.column
                    ),
                    SkipReason::Polymorphic => log::warn!(
                        "{}.{} has a polymorphic reference '{}'; integrity must be enforced by the application",
                        skipped.table,
                        skipped.column,
                        skipped.reference
                    ),
                }
                plan.skipped.push(skipped);
            }
            Resolution::Dangling(item) => {
                log::error!("Dangling foreign key: {item}");
                dangling.push(item);
            }
        }
    }

    if !dangling.is_empty() {
        return Err(SchemaConsistencyError {
            dangling,
            ..Default::default()
        });
    }

    log::info!(
        "Resolved {} foreign key(s), {} unique requirement(s), {} skipped",
        plan.resolved.len(),
        plan.unique_requirements.len(),
        plan.skipped.len()
    );
    Ok(plan)
}

enum Resolution {
    Resolved(ResolvedForeignKey),
    Skipped(SkippedForeignKey),
    Dangling(DanglingReference),
}

fn resolve_column(catalog: &Catalog, column: &ColumnDescriptor) -> Resolution {
    let reference = column.fk_reference.clone().unwrap_or_default();
    let skipped = |reason| {
        Resolution::Skipped(SkippedForeignKey {
            table: column.table.clone(),
            column: column.column.clone(),
            reference: reference.clone(),
            reason,
        })
    };
    let dangling = |reason| {
        Resolution::Dangling(DanglingReference {
            table: column.table.clone(),
            column: column.column.clone(),
            reference: reference.clone(),
            reason,
        })
    };

    if reference.is_empty() {
        return skipped(SkipReason::EmptyReference);
    }
    if is_polymorphic(&reference) {
        return skipped(SkipReason::Polymorphic);
    }

    let Some((target_table, target_column)) = parse_reference(&reference) else {
        return dangling(DanglingReason::Malformed);
    };
    let Some(table) = catalog.table(target_table) else {
        return dangling(DanglingReason::MissingTable(target_table.to_string()));
    };
    if !table.has_column(target_column) {
        return dangling(DanglingReason::MissingColumn {
            table: target_table.to_string(),
            column: target_column.to_string(),
        });
    }

    Resolution::Resolved(ResolvedForeignKey {
        source_table: column.table.clone(),
        source_column: column.column.clone(),
        target_table: target_table.to_string(),
        target_column: target_column.to_string(),
    })
}
