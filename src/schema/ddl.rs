//! DDL generation.
//!
//! Statements are produced in three phases so that no table ever depends on
//! another existing first:
//! 1. `CREATE TABLE IF NOT EXISTS` plus `COMMENT ON` for each table
//! 2. `ALTER TABLE ... ADD CONSTRAINT fk_<table>_<column> FOREIGN KEY ...`
//! 3. `CREATE OR REPLACE VIEW <table>_display` with labelled columns
//!
//! Every statement is safe to re-run. Table creation and views are
//! idempotent by themselves; foreign keys are filtered against the
//! constraints already in the database at execution time.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write};

use super::catalog::{Catalog, TableDescriptor};
use super::error::{DerivedNameKind, NameConflict, SchemaConsistencyError};
use super::foreign_key::{self, ForeignKeyPlan, ResolvedForeignKey};
use super::identifier::{bounded_identifier, quote_ident, quote_literal, MAX_IDENTIFIER_LEN};

/// Suffix of the labelled view created for each table
pub const VIEW_SUFFIX: &str = "_display";

/// Name of the labelled view of `table`, hash-suffixed past 63 bytes
pub fn view_name(table: &str) -> String {
    bounded_identifier(format!("{table}{VIEW_SUFFIX}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DdlPhase {
    Tables,
    ForeignKeys,
    Views,
}

impl DdlPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DdlPhase::Tables => "tables",
            DdlPhase::ForeignKeys => "foreign_keys",
            DdlPhase::Views => "views",
        }
    }
}

impl fmt::Display for DdlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    CreateTable,
    TableComment,
    ColumnComment,
    ForeignKey,
    View,
}

impl StatementKind {
    pub fn phase(&self) -> DdlPhase {
        match self {
            StatementKind::CreateTable | StatementKind::TableComment | StatementKind::ColumnComment => {
                DdlPhase::Tables
            }
            StatementKind::ForeignKey => DdlPhase::ForeignKeys,
            StatementKind::View => DdlPhase::Views,
        }
    }
}

/// One DDL statement with the catalog context it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    pub table: String,
    pub column: Option<String>,
    /// Constraint name, for foreign keys
    pub constraint: Option<String>,
    pub sql: String,
}

/// Which optional statements to generate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdlOptions {
    pub apply_comments: bool,
    pub create_views: bool,
}

impl Default for DdlOptions {
    fn default() -> Self {
        Self {
            apply_comments: true,
            create_views: true,
        }
    }
}

/// All statements for a catalog, grouped by phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaPlan {
    pub tables: Vec<Statement>,
    pub foreign_keys: Vec<Statement>,
    pub views: Vec<Statement>,
    pub foreign_key_plan: ForeignKeyPlan,
}

impl SchemaPlan {
    /// Resolve foreign keys, then generate every statement
    ///
    /// Fails before producing any SQL when a reference dangles or when two
    /// objects would end up with the same constraint or view name.
    pub fn from_catalog(catalog: &Catalog, options: DdlOptions) -> Result<Self, SchemaConsistencyError> {
        let fk_plan = foreign_key::resolve(catalog)?;
        let name_conflicts = derived_name_conflicts(catalog, &fk_plan, options);
        if !name_conflicts.is_empty() {
            for conflict in &name_conflicts {
                log::error!("Derived name conflict: {conflict}");
            }
            return Err(SchemaConsistencyError {
                dangling: Vec::new(),
                name_conflicts,
            });
        }
        Ok(Self::build(catalog, fk_plan, options))
    }

    pub fn build(catalog: &Catalog, fk_plan: ForeignKeyPlan, options: DdlOptions) -> Self {
        let mut tables = Vec::new();
        let mut views = Vec::new();

        for table in catalog.tables() {
            let unique: Vec<&str> = fk_plan.unique_columns(&table.name).collect();
            let Some(create) = create_table_sql(table, &unique) else {
                log::info!("Table {} has no columns, no DDL generated", table.name);
                continue;
            };
            tables.push(Statement {
                kind: StatementKind::CreateTable,
                table: table.name.clone(),
                column: None,
                constraint: None,
                sql: create,
            });

            if options.apply_comments {
                tables.extend(comment_statements(table));
            }

            if options.create_views {
                if let Some(sql) = view_sql(table) {
                    views.push(Statement {
                        kind: StatementKind::View,
                        table: table.name.clone(),
                        column: None,
                        constraint: None,
                        sql,
                    });
                }
            }
        }

        let foreign_keys = fk_plan
            .resolved
            .iter()
            .map(|fk| Statement {
                kind: StatementKind::ForeignKey,
                table: fk.source_table.clone(),
                column: Some(fk.source_column.clone()),
                constraint: Some(fk.constraint_name()),
                sql: foreign_key_sql(fk),
            })
            .collect();

        Self {
            tables,
            foreign_keys,
            views,
            foreign_key_plan: fk_plan,
        }
    }

    pub fn phase(&self, phase: DdlPhase) -> &[Statement] {
        match phase {
            DdlPhase::Tables => &self.tables,
            DdlPhase::ForeignKeys => &self.foreign_keys,
            DdlPhase::Views => &self.views,
        }
    }

    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.tables
            .iter()
            .chain(self.foreign_keys.iter())
            .chain(self.views.iter())
    }

    pub fn len(&self) -> usize {
        self.tables.len() + self.foreign_keys.len() + self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the whole plan as one SQL script
    pub fn to_sql_script(&self) -> String {
        let mut script = String::new();
        for (number, phase) in [DdlPhase::Tables, DdlPhase::ForeignKeys, DdlPhase::Views]
            .into_iter()
            .enumerate()
        {
            let statements = self.phase(phase);
            if statements.is_empty() {
                continue;
            }
            if !script.is_empty() {
                script.push('\n');
            }
            let _ = writeln!(script, "-- Phase {}: {}", number + 1, phase);
            for statement in statements {
                let _ = writeln!(script, "{};", statement.sql);
            }
        }
        script
    }
}

/// `CREATE TABLE IF NOT EXISTS` for one table; `None` when it has no columns
pub fn create_table_sql(table: &TableDescriptor, unique_columns: &[&str]) -> Option<String> {
    if table.columns.is_empty() {
        return None;
    }

    let primary_key = table.primary_key();
    let inline_key = primary_key.len() == 1;

    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|column| {
            let mut def = format!("{} {}", quote_ident(&column.column), column.sql_type);
            if inline_key && column.is_primary_key {
                def.push_str(" PRIMARY KEY");
            }
            def
        })
        .collect();

    if primary_key.len() > 1 {
        let columns: Vec<String> = primary_key.iter().map(|c| quote_ident(&c.column)).collect();
        parts.push(format!("PRIMARY KEY ({})", columns.join(", ")));
    }
    for column in unique_columns {
        parts.push(format!("UNIQUE ({})", quote_ident(column)));
    }

    Some(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&table.name),
        parts.join(", ")
    ))
}

fn comment_statements(table: &TableDescriptor) -> Vec<Statement> {
    let table_ident = quote_ident(&table.name);
    let mut statements = vec![Statement {
        kind: StatementKind::TableComment,
        table: table.name.clone(),
        column: None,
        constraint: None,
        sql: format!("COMMENT ON TABLE {} IS {}", table_ident, quote_literal(&table.table_type)),
    }];

    statements.extend(table.columns.iter().map(|column| Statement {
        kind: StatementKind::ColumnComment,
        table: table.name.clone(),
        column: Some(column.column.clone()),
        constraint: None,
        sql: format!(
            "COMMENT ON COLUMN {}.{} IS {}",
            table_ident,
            quote_ident(&column.column),
            quote_literal(&column.display_label)
        ),
    }));
    statements
}

pub fn foreign_key_sql(fk: &ResolvedForeignKey) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({})",
        quote_ident(&fk.source_table),
        fk.constraint_name(),
        quote_ident(&fk.source_column),
        quote_ident(&fk.target_table),
        quote_ident(&fk.target_column)
    )
}

/// `CREATE OR REPLACE VIEW <table>_display`; `None` when the table has no columns
pub fn view_sql(table: &TableDescriptor) -> Option<String> {
    if table.columns.is_empty() {
        return None;
    }

    let aliases = view_aliases(table);
    let select: Vec<String> = table
        .columns
        .iter()
        .zip(aliases.iter())
        .map(|(column, alias)| {
            format!("{} AS \"{}\"", quote_ident(&column.column), alias.replace('"', "\"\""))
        })
        .collect();

    Some(format!(
        "CREATE OR REPLACE VIEW {} AS SELECT {} FROM {}",
        quote_ident(&view_name(&table.name)),
        select.join(", "),
        quote_ident(&table.name)
    ))
}

/// Constraint and view names that the server would see as the same object
///
/// Constraint names are emitted unquoted and compared case-folded. View
/// names share the relation namespace with every catalog table.
pub fn derived_name_conflicts(
    catalog: &Catalog,
    fk_plan: &ForeignKeyPlan,
    options: DdlOptions,
) -> Vec<NameConflict> {
    let mut conflicts = Vec::new();

    let mut constraints: HashMap<String, String> = HashMap::new();
    for fk in &fk_plan.resolved {
        let name = fk.constraint_name();
        let owner = format!("{}.{}", fk.source_table, fk.source_column);
        match constraints.get(&name.to_ascii_lowercase()) {
            Some(first) => conflicts.push(NameConflict {
                kind: DerivedNameKind::Constraint,
                name,
                first: first.clone(),
                second: owner,
            }),
            None => {
                constraints.insert(name.to_ascii_lowercase(), owner);
            }
        }
    }

    if options.create_views {
        let mut relations: HashMap<String, String> = catalog
            .tables()
            .iter()
            .map(|t| (t.name.clone(), format!("table {}", t.name)))
            .collect();
        for table in catalog.tables().iter().filter(|t| !t.columns.is_empty()) {
            let name = view_name(&table.name);
            let owner = format!("view of {}", table.name);
            match relations.get(&name) {
                Some(first) => conflicts.push(NameConflict {
                    kind: DerivedNameKind::View,
                    name,
                    first: first.clone(),
                    second: owner,
                }),
                None => {
                    relations.insert(name, owner);
                }
            }
        }
    }

    conflicts
}

/// Display label with spaces, hyphens and parentheses removed
pub fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect()
}

/// Column aliases for a table's view, one per column, all distinct
///
/// Aliases are at most 63 bytes once embedded quotes are doubled.
pub fn view_aliases(table: &TableDescriptor) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    table
        .columns
        .iter()
        .map(|column| {
            let mut base = sanitize_label(&column.display_label);
            if base.is_empty() {
                base = column.column.clone();
            }
            let base = truncate_quoted(&base, MAX_IDENTIFIER_LEN).to_string();

            let mut alias = base.clone();
            let mut n = 2;
            while seen.contains(&alias) {
                let suffix = format!("_{n}");
                alias = format!(
                    "{}{}",
                    truncate_quoted(&base, MAX_IDENTIFIER_LEN - suffix.len()),
                    suffix
                );
                n += 1;
            }
            seen.insert(alias.clone());
            alias
        })
        .collect()
}

/// Longest prefix of `value` that stays within `max` bytes after `"` is doubled
fn truncate_quoted(value: &str, max: usize) -> &str {
    let mut used = 0;
    for (idx, c) in value.char_indices() {
        let width = if c == '"' { 2 } else { c.len_utf8() };
        if used + width > max {
            return &value[..idx];
        }
        used += width;
    }
    value
}
