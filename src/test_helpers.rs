//! In-memory stand-in for PostgreSQL (enabled with the `test-helpers` feature).
//!
//! [`SimulatedDatabase`] understands exactly the SQL this crate emits and
//! enforces the server rules the bootstrap relies on:
//! - transactions, savepoints and the "current transaction is aborted" state
//! - unquoted identifiers fold to lower case, quoted ones keep their case
//! - `ADD CONSTRAINT` fails on a duplicate name, a missing table or column,
//!   or a target column without a primary key or UNIQUE constraint
//! - views and comments need their table to exist
//!
//! Failures can be injected by substring, and the advisory lock can be
//! marked as held by another session.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use bytes::BytesMut;
use may_postgres::types::{IsNull, ToSql, Type};

use crate::executor::{DbError, SqlExecutor};
use crate::schema::identifier::truncate_identifier;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SimTable {
    columns: Vec<String>,
    /// Single columns with a primary key or UNIQUE constraint
    unique: BTreeSet<String>,
    rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SimForeignKey {
    table: String,
    column: String,
    target_table: String,
    target_column: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Schema {
    tables: BTreeMap<String, SimTable>,
    constraints: BTreeMap<String, SimForeignKey>,
    views: BTreeMap<String, String>,
    comments: BTreeMap<String, String>,
}

#[derive(Debug)]
struct OpenTransaction {
    working: Schema,
    savepoints: Vec<(String, Schema)>,
    aborted: bool,
}

#[derive(Debug, Default)]
struct Inner {
    committed: Schema,
    transaction: Option<OpenTransaction>,
    log: Vec<String>,
    fail_patterns: Vec<String>,
    lock_held_elsewhere: bool,
}

impl Inner {
    fn visible(&self) -> &Schema {
        self.transaction
            .as_ref()
            .map_or(&self.committed, |tx| &tx.working)
    }
}

/// Committed schema objects, for comparing database states
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSnapshot {
    pub tables: Vec<String>,
    pub constraints: Vec<String>,
    pub views: Vec<String>,
    pub comments: usize,
}

/// An in-memory database speaking the bootstrap's SQL
#[derive(Debug, Default)]
pub struct SimulatedDatabase {
    inner: Mutex<Inner>,
}

impl SimulatedDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reject every statement containing `pattern`
    pub fn fail_statements_containing(&self, pattern: &str) {
        self.inner().fail_patterns.push(pattern.to_string());
    }

    pub fn clear_failures(&self) {
        self.inner().fail_patterns.clear();
    }

    /// Make `pg_try_advisory_lock` report the lock as taken
    pub fn hold_lock_elsewhere(&self, held: bool) {
        self.inner().lock_held_elsewhere = held;
    }

    /// Every statement and query received, in order
    pub fn statements(&self) -> Vec<String> {
        self.inner().log.clone()
    }

    pub fn clear_statements(&self) {
        self.inner().log.clear();
    }

    pub fn in_transaction(&self) -> bool {
        self.inner().transaction.is_some()
    }

    pub fn snapshot(&self) -> SchemaSnapshot {
        let inner = self.inner();
        let schema = &inner.committed;
        SchemaSnapshot {
            tables: schema.tables.keys().cloned().collect(),
            constraints: schema.constraints.keys().cloned().collect(),
            views: schema.views.keys().cloned().collect(),
            comments: schema.comments.len(),
        }
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.inner().committed.tables.contains_key(name)
    }

    pub fn columns(&self, table: &str) -> Vec<String> {
        self.inner()
            .committed
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default()
    }

    pub fn has_constraint(&self, name: &str) -> bool {
        self.inner()
            .committed
            .constraints
            .contains_key(&fold_constraint_name(name))
    }

    /// `table.column -> target(column)` for a committed foreign key
    pub fn foreign_key(&self, name: &str) -> Option<String> {
        self.inner()
            .committed
            .constraints
            .get(&fold_constraint_name(name))
            .map(|fk| {
                format!(
                    "{}.{} -> {}({})",
                    fk.table, fk.column, fk.target_table, fk.target_column
                )
            })
    }

    pub fn has_view(&self, name: &str) -> bool {
        self.inner().committed.views.contains_key(name)
    }

    /// Table a view selects from
    pub fn view_source(&self, name: &str) -> Option<String> {
        self.inner().committed.views.get(name).cloned()
    }

    /// Comment on `table` or `table.column`
    pub fn comment(&self, target: &str) -> Option<String> {
        self.inner().committed.comments.get(target).cloned()
    }

    pub fn rows(&self, table: &str) -> Vec<Vec<Option<String>>> {
        self.inner()
            .committed
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn control(inner: &mut Inner, sql: &str) -> Option<Result<u64, DbError>> {
        if sql == "BEGIN" {
            if inner.transaction.is_some() {
                return Some(Err(query_error("there is already a transaction in progress")));
            }
            inner.transaction = Some(OpenTransaction {
                working: inner.committed.clone(),
                savepoints: Vec::new(),
                aborted: false,
            });
            return Some(Ok(0));
        }
        if sql == "COMMIT" {
            // An aborted transaction is rolled back by COMMIT.
            if let Some(tx) = inner.transaction.take() {
                if !tx.aborted {
                    inner.committed = tx.working;
                }
            }
            return Some(Ok(0));
        }
        if sql == "ROLLBACK" {
            inner.transaction = None;
            return Some(Ok(0));
        }

        let (action, name) = if let Some(name) = sql.strip_prefix("ROLLBACK TO SAVEPOINT ") {
            ("rollback", name)
        } else if let Some(name) = sql.strip_prefix("RELEASE SAVEPOINT ") {
            ("release", name)
        } else if let Some(name) = sql.strip_prefix("SAVEPOINT ") {
            ("savepoint", name)
        } else {
            return None;
        };

        let Some(tx) = inner.transaction.as_mut() else {
            return Some(Err(query_error(&format!("{action} can only be used in transaction blocks"))));
        };
        let name = name.trim().to_string();
        let position = tx.savepoints.iter().rposition(|(n, _)| *n == name);

        let result = match action {
            "savepoint" if tx.aborted => Err(aborted_error()),
            "savepoint" => {
                tx.savepoints.push((name, tx.working.clone()));
                Ok(0)
            }
            _ if position.is_none() => Err(query_error(&format!("savepoint \"{name}\" does not exist"))),
            "release" if tx.aborted => Err(aborted_error()),
            "release" => {
                tx.savepoints.truncate(position.unwrap_or(0));
                Ok(0)
            }
            _ => {
                let idx = position.unwrap_or(0);
                tx.working = tx.savepoints[idx].1.clone();
                tx.savepoints.truncate(idx + 1);
                tx.aborted = false;
                Ok(0)
            }
        };
        Some(result)
    }
}

impl SqlExecutor for SimulatedDatabase {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError> {
        let mut inner = self.inner();
        inner.log.push(query.to_string());
        let sql = query.trim();

        if inner.fail_patterns.iter().any(|p| sql.contains(p.as_str())) {
            // A failed COMMIT still ends the transaction.
            if sql == "COMMIT" {
                inner.transaction = None;
            } else if let Some(tx) = inner.transaction.as_mut() {
                tx.aborted = true;
            }
            return Err(query_error(&format!("simulated failure: {sql}")));
        }

        if let Some(result) = Self::control(&mut inner, sql) {
            return result;
        }

        let values = params
            .iter()
            .map(|p| decode_text(*p))
            .collect::<Result<Vec<_>, _>>()?;

        let Inner {
            committed,
            transaction,
            ..
        } = &mut *inner;
        match transaction {
            Some(tx) if tx.aborted => Err(aborted_error()),
            Some(tx) => {
                let result = apply(&mut tx.working, sql, &values);
                if result.is_err() {
                    tx.aborted = true;
                }
                result
            }
            None => {
                let mut next = committed.clone();
                let result = apply(&mut next, sql, &values);
                if result.is_ok() {
                    *committed = next;
                }
                result
            }
        }
    }

    fn query_strings(&self, query: &str, _params: &[&dyn ToSql]) -> Result<Vec<String>, DbError> {
        let mut inner = self.inner();
        inner.log.push(query.to_string());

        if inner.fail_patterns.iter().any(|p| query.contains(p.as_str())) {
            return Err(query_error(&format!("simulated failure: {query}")));
        }
        if inner.transaction.as_ref().is_some_and(|tx| tx.aborted) {
            return Err(aborted_error());
        }

        if query.contains("pg_try_advisory_lock") {
            return Ok(vec![(!inner.lock_held_elsewhere).to_string()]);
        }
        if query.contains("pg_advisory_unlock") {
            return Ok(vec!["true".to_string()]);
        }

        let schema = inner.visible();
        if query.contains("FROM pg_constraint") {
            return Ok(schema.constraints.keys().cloned().collect());
        }
        if query.contains("table_type = 'BASE TABLE'") {
            return Ok(schema.tables.keys().cloned().collect());
        }
        if query.contains("table_type = 'VIEW'") {
            return Ok(schema.views.keys().cloned().collect());
        }
        Err(query_error(&format!("unsupported query: {query}")))
    }
}

fn query_error(message: &str) -> DbError {
    DbError::Query(message.to_string())
}

fn aborted_error() -> DbError {
    query_error("current transaction is aborted, commands ignored until end of transaction block")
}

fn decode_text(param: &dyn ToSql) -> Result<Option<String>, DbError> {
    let mut buf = BytesMut::new();
    match param.to_sql_checked(&Type::TEXT, &mut buf) {
        Ok(IsNull::Yes) => Ok(None),
        Ok(IsNull::No) => String::from_utf8(buf.to_vec())
            .map(Some)
            .map_err(|e| DbError::Parse(e.to_string())),
        Err(e) => Err(DbError::Parse(e.to_string())),
    }
}

fn fold_constraint_name(name: &str) -> String {
    truncate_identifier(&name.to_lowercase()).to_string()
}

/// Read one identifier, folding it the way the server does
fn take_ident(input: &str) -> Result<(String, &str), DbError> {
    let input = input.trim_start();
    if let Some(rest) = input.strip_prefix('"') {
        let mut name = String::new();
        let mut chars = rest.char_indices().peekable();
        while let Some((idx, c)) = chars.next() {
            if c == '"' {
                if matches!(chars.peek(), Some((_, '"'))) {
                    chars.next();
                    name.push('"');
                    continue;
                }
                return Ok((name, &rest[idx + 1..]));
            }
            name.push(c);
        }
        return Err(query_error("unterminated quoted identifier"));
    }

    let end = input
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(input.len());
    if end == 0 {
        return Err(query_error(&format!("syntax error at or near \"{input}\"")));
    }
    Ok((input[..end].to_lowercase(), &input[end..]))
}

fn expect_keyword<'a>(input: &'a str, keyword: &str) -> Result<&'a str, DbError> {
    input
        .trim_start()
        .strip_prefix(keyword)
        .ok_or_else(|| query_error(&format!("syntax error: expected {keyword}")))
}

/// Split on commas that are not inside parentheses or quotes
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quoted = false;
    let mut start = 0;
    for (idx, c) in body.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth -= 1,
            ',' if !quoted && depth == 0 => {
                parts.push(body[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(body[start..].trim());
    parts
}

/// Parse `(a, b)` into folded identifiers
fn ident_list(input: &str) -> Result<(Vec<String>, &str), DbError> {
    let mut rest = expect_keyword(input, "(")?;
    let mut names = Vec::new();
    loop {
        let (name, after) = take_ident(rest)?;
        names.push(name);
        let after = after.trim_start();
        if let Some(after) = after.strip_prefix(',') {
            rest = after;
        } else {
            return Ok((names, expect_keyword(after, ")")?));
        }
    }
}

fn table_mut<'a>(schema: &'a mut Schema, name: &str) -> Result<&'a mut SimTable, DbError> {
    schema
        .tables
        .get_mut(name)
        .ok_or_else(|| query_error(&format!("relation \"{name}\" does not exist")))
}

fn apply(schema: &mut Schema, sql: &str, values: &[Option<String>]) -> Result<u64, DbError> {
    if let Some(rest) = sql.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
        create_table(schema, rest)
    } else if let Some(rest) = sql.strip_prefix("COMMENT ON TABLE ") {
        let (table, rest) = take_ident(rest)?;
        table_mut(schema, &table)?;
        let text = expect_keyword(rest, "IS")?.trim().to_string();
        schema.comments.insert(table, unquote_literal(&text));
        Ok(0)
    } else if let Some(rest) = sql.strip_prefix("COMMENT ON COLUMN ") {
        let (table, rest) = take_ident(rest)?;
        let (column, rest) = take_ident(expect_keyword(rest, ".")?)?;
        if !table_mut(schema, &table)?.columns.contains(&column) {
            return Err(query_error(&format!("column \"{column}\" of relation \"{table}\" does not exist")));
        }
        let text = expect_keyword(rest, "IS")?.trim().to_string();
        schema.comments.insert(format!("{table}.{column}"), unquote_literal(&text));
        Ok(0)
    } else if let Some(rest) = sql.strip_prefix("ALTER TABLE ") {
        add_foreign_key(schema, rest)
    } else if let Some(rest) = sql.strip_prefix("CREATE OR REPLACE VIEW ") {
        let (view, rest) = take_ident(rest)?;
        let rest = expect_keyword(rest, "AS SELECT")?;
        let from = rest
            .rfind(" FROM ")
            .ok_or_else(|| query_error("view without FROM"))?;
        let (table, _) = take_ident(&rest[from + 6..])?;
        let source = table_mut(schema, &table)?;
        for item in split_top_level(&rest[..from]) {
            let (column, _) = take_ident(item)?;
            if !source.columns.contains(&column) {
                return Err(query_error(&format!("column \"{column}\" does not exist")));
            }
        }
        schema.views.insert(view, table);
        Ok(0)
    } else if let Some(rest) = sql.strip_prefix("INSERT INTO ") {
        insert_if_absent(schema, rest, values)
    } else {
        Err(query_error(&format!("unsupported statement: {sql}")))
    }
}

fn unquote_literal(text: &str) -> String {
    text.trim_matches('\'').replace("''", "'")
}

fn create_table(schema: &mut Schema, rest: &str) -> Result<u64, DbError> {
    let (name, rest) = take_ident(rest)?;
    if schema.tables.contains_key(&name) {
        return Ok(0);
    }

    let body = rest
        .trim()
        .strip_prefix('(')
        .and_then(|b| b.strip_suffix(')'))
        .ok_or_else(|| query_error("syntax error in CREATE TABLE"))?;

    let mut table = SimTable::default();
    let mut constraints = Vec::new();
    for part in split_top_level(body) {
        if part.starts_with("PRIMARY KEY") || part.starts_with("UNIQUE") {
            constraints.push(part);
            continue;
        }
        let (column, def) = take_ident(part)?;
        if table.columns.contains(&column) {
            return Err(query_error(&format!("column \"{column}\" specified more than once")));
        }
        if def.contains("PRIMARY KEY") {
            table.unique.insert(column.clone());
        }
        table.columns.push(column);
    }

    for constraint in constraints {
        let list = constraint
            .trim_start_matches("PRIMARY KEY")
            .trim_start_matches("UNIQUE");
        let (columns, _) = ident_list(list)?;
        for column in &columns {
            if !table.columns.contains(column) {
                return Err(query_error(&format!("column \"{column}\" named in key does not exist")));
            }
        }
        if let [single] = columns.as_slice() {
            table.unique.insert(single.clone());
        }
    }

    schema.tables.insert(name, table);
    Ok(0)
}

fn add_foreign_key(schema: &mut Schema, rest: &str) -> Result<u64, DbError> {
    let (table, rest) = take_ident(rest)?;
    let rest = expect_keyword(rest, "ADD CONSTRAINT")?;
    let (name, rest) = take_ident(rest)?;
    let name = truncate_identifier(&name).to_string();
    let rest = expect_keyword(rest, "FOREIGN KEY")?;
    let (columns, rest) = ident_list(rest)?;
    let rest = expect_keyword(rest, "REFERENCES")?;
    let (target_table, rest) = take_ident(rest)?;
    let (target_columns, _) = ident_list(rest)?;

    let (Some(column), Some(target_column)) = (columns.first(), target_columns.first()) else {
        return Err(query_error("syntax error in FOREIGN KEY"));
    };

    if schema.constraints.contains_key(&name) {
        return Err(query_error(&format!(
            "constraint \"{name}\" for relation \"{table}\" already exists"
        )));
    }
    if !table_mut(schema, &table)?.columns.contains(column) {
        return Err(query_error(&format!(
            "column \"{column}\" referenced in foreign key constraint does not exist"
        )));
    }
    let target = table_mut(schema, &target_table)?;
    if !target.columns.contains(target_column) {
        return Err(query_error(&format!(
            "column \"{target_column}\" referenced in foreign key constraint does not exist"
        )));
    }
    if !target.unique.contains(target_column) {
        return Err(query_error(&format!(
            "there is no unique constraint matching given keys for referenced table \"{target_table}\""
        )));
    }

    schema.constraints.insert(
        name,
        SimForeignKey {
            table,
            column: column.clone(),
            target_table,
            target_column: target_column.clone(),
        },
    );
    Ok(0)
}

fn insert_if_absent(schema: &mut Schema, rest: &str, values: &[Option<String>]) -> Result<u64, DbError> {
    let (table_name, rest) = take_ident(rest)?;
    let (columns, _) = ident_list(rest)?;
    let table = table_mut(schema, &table_name)?;

    let mut positions = Vec::with_capacity(columns.len());
    for column in &columns {
        let position = table
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| query_error(&format!("column \"{column}\" of relation \"{table_name}\" does not exist")))?;
        positions.push(position);
    }
    if values.len() != columns.len() {
        return Err(query_error(&format!(
            "bind message supplies {} parameters, but statement requires {}",
            values.len(),
            columns.len()
        )));
    }

    let key_position = positions[0];
    if table
        .rows
        .iter()
        .any(|row| row[key_position].is_some() && row[key_position] == values[0])
    {
        return Ok(0);
    }

    let mut row = vec![None; table.columns.len()];
    for (position, value) in positions.iter().zip(values) {
        row[*position] = value.clone();
    }
    table.rows.push(row);
    Ok(1)
}
