//! Reading back what already exists in the database

use crate::executor::{DbError, SqlExecutor};
use crate::schema::ddl::{view_name, SchemaPlan, StatementKind};
use crate::schema::identifier::identifiers_match;

const FOREIGN_KEYS_SQL: &str = "SELECT conname::text FROM pg_constraint \
     WHERE contype = 'f' AND connamespace = (SELECT oid FROM pg_namespace WHERE nspname = current_schema())";

const TABLES_SQL: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'";

const VIEWS_SQL: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = current_schema() AND table_type = 'VIEW'";

/// Names of the foreign-key constraints in the current schema
pub fn existing_foreign_keys(executor: &dyn SqlExecutor) -> Result<Vec<String>, DbError> {
    executor.query_strings(FOREIGN_KEYS_SQL, &[])
}

pub fn existing_tables(executor: &dyn SqlExecutor) -> Result<Vec<String>, DbError> {
    executor.query_strings(TABLES_SQL, &[])
}

pub fn existing_views(executor: &dyn SqlExecutor) -> Result<Vec<String>, DbError> {
    executor.query_strings(VIEWS_SQL, &[])
}

/// Whether `name` is among `existing`, the way the server compares
/// unquoted constraint names
pub fn constraint_exists(existing: &[String], name: &str) -> bool {
    existing.iter().any(|e| identifiers_match(e, name))
}

/// Catalog objects missing from the database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaStatus {
    pub expected_tables: usize,
    pub expected_foreign_keys: usize,
    pub expected_views: usize,
    pub missing_tables: Vec<String>,
    pub missing_foreign_keys: Vec<String>,
    pub missing_views: Vec<String>,
}

impl SchemaStatus {
    pub fn is_complete(&self) -> bool {
        self.missing_tables.is_empty()
            && self.missing_foreign_keys.is_empty()
            && self.missing_views.is_empty()
    }
}

/// Compare a plan with the live schema
pub fn schema_status(executor: &dyn SqlExecutor, plan: &SchemaPlan) -> Result<SchemaStatus, DbError> {
    let tables = existing_tables(executor)?;
    let views = existing_views(executor)?;
    let foreign_keys = existing_foreign_keys(executor)?;

    let planned_tables: Vec<&str> = plan.tables.iter()
        .filter(|s| s.kind == StatementKind::CreateTable)
        .map(|s| s.table.as_str())
        .collect();
    let planned_views: Vec<String> = plan.views.iter()
        .map(|s| view_name(&s.table))
        .collect();
    let planned_fks: Vec<&str> = plan.foreign_keys.iter()
        .filter_map(|s| s.constraint.as_deref())
        .collect();

    Ok(SchemaStatus {
        expected_tables: planned_tables.len(),
        expected_foreign_keys: planned_fks.len(),
        expected_views: planned_views.len(),
        missing_tables: planned_tables
            .iter()
            .filter(|t| !tables.iter().any(|e| e == *t))
            .map(|t| t.to_string())
            .collect(),
        missing_foreign_keys: planned_fks
            .iter()
            .filter(|name| !constraint_exists(&foreign_keys, name))
            .map(|name| name.to_string())
            .collect(),
        missing_views: planned_views
            .into_iter()
            .filter(|v| !views.iter().any(|e| e == v))
            .collect(),
    })
}
