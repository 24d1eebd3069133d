//! Post-bootstrap seeding
//!
//! A seeder runs once after the views phase. It is an opaque step: whatever
//! it reports, the bootstrap itself has already succeeded.
//!
//! Two seeders are provided:
//! - [`CsvSeeder`] loads `<dir>/<table>.csv` reference files, inserting each
//!   row only when its natural key (first column) is not present yet
//! - [`CommandSeeder`] runs an external program with `DATABASE_URL` set

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use may_postgres::types::ToSql;

use crate::executor::SqlExecutor;
use crate::schema::catalog::{clean_field, Catalog, TableDescriptor};
use crate::schema::identifier::quote_ident;
use crate::transaction::Transaction;

use super::error::SeedStepError;

/// What a seed step did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub files: usize,
    pub inserted: u64,
    /// Rows whose natural key was already present
    pub existing: u64,
    pub failed: u64,
}

impl SeedSummary {
    fn merge(&mut self, other: &SeedSummary) {
        self.files += other.files;
        self.inserted += other.inserted;
        self.existing += other.existing;
        self.failed += other.failed;
    }
}

/// The optional step run after the schema is in place
pub trait Seeder {
    fn name(&self) -> &str;

    fn seed(&self, executor: &dyn SqlExecutor, catalog: &Catalog) -> Result<SeedSummary, SeedStepError>;
}

/// Loads reference rows from `<dir>/<table>.csv`
///
/// Tables are visited in catalog order. Each file runs in its own
/// transaction with one savepoint per row, so a bad row is counted and
/// skipped without losing the rest of the file.
pub struct CsvSeeder {
    dir: PathBuf,
}

impl CsvSeeder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn seed_file(
        &self,
        executor: &dyn SqlExecutor,
        table: &TableDescriptor,
        path: &Path,
    ) -> Result<SeedSummary, SeedStepError> {
        let file_error = |source: csv::Error| SeedStepError::File {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(file_error)?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(file_error)?
            .iter()
            .map(clean_field)
            .collect();

        if headers.is_empty() {
            log::warn!("Seed file {} has no header, skipping", path.display());
            return Ok(SeedSummary::default());
        }

        let mut casts = Vec::with_capacity(headers.len());
        for header in &headers {
            let column = table.column(header).ok_or_else(|| SeedStepError::UnknownColumn {
                path: path.to_path_buf(),
                table: table.name.clone(),
                column: header.clone(),
            })?;
            casts.push(column.sql_type.cast_type().to_string());
        }

        let sql = insert_if_absent_sql(&table.name, &headers, &casts);
        log::debug!("Seeding {} with: {sql}", table.name);

        let mut summary = SeedSummary {
            files: 1,
            ..Default::default()
        };
        let mut tx = Transaction::begin(executor)?;

        for (i, record) in reader.records().enumerate() {
            let row_num = i + 1;
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("{}: skipping row {row_num}: {e}", path.display());
                    summary.failed += 1;
                    continue;
                }
            };

            let values: Vec<Option<String>> = (0..headers.len())
                .map(|idx| record.get(idx).filter(|v| !v.is_empty()).map(str::to_string))
                .collect();
            if values.first().map_or(true, Option::is_none) {
                log::warn!("{}: skipping row {row_num}: empty natural key", path.display());
                summary.failed += 1;
                continue;
            }

            let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
            match tx.execute_isolated(&sql, &params) {
                Ok(0) => summary.existing += 1,
                Ok(n) => summary.inserted += n,
                Err(e) => {
                    log::warn!("{}: row {row_num} rejected: {e}", path.display());
                    summary.failed += 1;
                }
            }
        }

        tx.commit()?;
        log::info!(
            "Seeded {}: {} inserted, {} already present, {} failed",
            table.name,
            summary.inserted,
            summary.existing,
            summary.failed
        );
        Ok(summary)
    }
}

impl Seeder for CsvSeeder {
    fn name(&self) -> &str {
        "csv"
    }

    fn seed(&self, executor: &dyn SqlExecutor, catalog: &Catalog) -> Result<SeedSummary, SeedStepError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| SeedStepError::Directory {
            path: self.dir.clone(),
            source,
        })?;

        let mut available: HashSet<String> = HashSet::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("csv") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    available.insert(stem.to_string());
                }
            }
        }

        let mut total = SeedSummary::default();
        for table in catalog.tables() {
            if !available.remove(&table.name) {
                continue;
            }
            let path = self.dir.join(format!("{}.csv", table.name));
            let summary = self.seed_file(executor, table, &path)?;
            total.merge(&summary);
        }

        for stem in available {
            log::warn!("Seed file {stem}.csv does not match any catalog table, ignored");
        }
        Ok(total)
    }
}

/// `INSERT ... SELECT ... WHERE NOT EXISTS` keyed on the first column
///
/// Values are bound as text and cast to each column's type, so one
/// statement shape serves every table. `columns` must not be empty.
pub fn insert_if_absent_sql(table: &str, columns: &[String], casts: &[String]) -> String {
    let table_ident = quote_ident(table);
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let values: Vec<String> = casts
        .iter()
        .enumerate()
        .map(|(i, cast)| format!("${}::text::{}", i + 1, cast))
        .collect();

    format!(
        "INSERT INTO {table_ident} ({}) SELECT {} WHERE NOT EXISTS (SELECT 1 FROM {table_ident} WHERE {} = {})",
        column_list.join(", "),
        values.join(", "),
        column_list[0],
        values[0]
    )
}

/// Runs an external program as the seed step
///
/// The program gets `DATABASE_URL` in its environment and must exit with
/// status 0.
pub struct CommandSeeder {
    program: String,
    args: Vec<String>,
    database_url: String,
}

impl CommandSeeder {
    /// Build from a command line, program first
    pub fn from_command(command: &[String], database_url: &str) -> Result<Self, SeedStepError> {
        let (program, args) = command.split_first().ok_or(SeedStepError::EmptyCommand)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            database_url: database_url.to_string(),
        })
    }
}

impl Seeder for CommandSeeder {
    fn name(&self) -> &str {
        &self.program
    }

    fn seed(&self, _executor: &dyn SqlExecutor, _catalog: &Catalog) -> Result<SeedSummary, SeedStepError> {
        log::info!("Running seed command: {} {}", self.program, self.args.join(" "));
        let status = Command::new(&self.program)
            .args(&self.args)
            .env("DATABASE_URL", &self.database_url)
            .status()
            .map_err(|source| SeedStepError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(SeedStepError::Command {
                program: self.program.clone(),
                status: status.to_string(),
            });
        }
        Ok(SeedSummary::default())
    }
}
