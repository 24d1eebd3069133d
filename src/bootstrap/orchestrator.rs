//! Bootstrap orchestrator - runs a schema plan against the database

use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Instant;

use crate::executor::SqlExecutor;
use crate::schema::catalog::Catalog;
use crate::schema::checksum::short_checksum;
use crate::schema::ddl::{DdlOptions, DdlPhase, SchemaPlan, Statement, StatementKind};
use crate::transaction::Transaction;

#[cfg(feature = "tracing")]
use crate::telemetry;

use super::error::{BootstrapError, StatementExecutionError};
use super::introspect::{constraint_exists, existing_foreign_keys};
use super::seed::{SeedSummary, Seeder};
use super::state::{BootstrapPhase, PhaseTracker};

/// Optional parts of a bootstrap run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapOptions {
    pub create_views: bool,
    pub apply_comments: bool,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            create_views: true,
            apply_comments: true,
        }
    }
}

impl BootstrapOptions {
    pub fn ddl_options(&self) -> DdlOptions {
        DdlOptions {
            apply_comments: self.apply_comments,
            create_views: self.create_views,
        }
    }
}

/// Statement counts for one phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub phase: DdlPhase,
    pub executed: usize,
    /// Foreign keys that already existed
    pub skipped: usize,
    pub failed: usize,
    pub committed: bool,
}

impl PhaseReport {
    fn new(phase: DdlPhase) -> Self {
        Self {
            phase,
            executed: 0,
            skipped: 0,
            failed: 0,
            committed: false,
        }
    }
}

/// Result of one seeder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedOutcome {
    pub seeder: String,
    pub result: Result<SeedSummary, String>,
}

/// Everything a bootstrap run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub final_phase: BootstrapPhase,
    pub history: Vec<BootstrapPhase>,
    pub catalog_checksum: String,
    pub phases: Vec<PhaseReport>,
    pub errors: Vec<StatementExecutionError>,
    /// Empty when no seeder was configured
    pub seeds: Vec<SeedOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BootstrapReport {
    pub fn phase(&self, phase: DdlPhase) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn executed(&self) -> usize {
        self.phases.iter().map(|p| p.executed).sum()
    }

    pub fn skipped(&self) -> usize {
        self.phases.iter().map(|p| p.skipped).sum()
    }

    pub fn failed(&self) -> usize {
        self.phases.iter().map(|p| p.failed).sum()
    }

    /// No statement failed and every seeder succeeded
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.seeds.iter().all(|s| s.result.is_ok())
    }
}

/// Runs the three DDL phases and the optional seed step on one session
///
/// Per-statement failures are recorded in the report and never abort a
/// phase; only catalog and consistency problems are returned as errors.
pub struct Bootstrap<'a> {
    executor: &'a dyn SqlExecutor,
    options: BootstrapOptions,
    seeders: Vec<&'a dyn Seeder>,
}

impl<'a> Bootstrap<'a> {
    pub fn new(executor: &'a dyn SqlExecutor) -> Self {
        Self {
            executor,
            options: BootstrapOptions::default(),
            seeders: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: BootstrapOptions) -> Self {
        self.options = options;
        self
    }

    /// Add a seeder; seeders run in the order they were added
    pub fn with_seeder(mut self, seeder: &'a dyn Seeder) -> Self {
        self.seeders.push(seeder);
        self
    }

    /// Load the catalog at `path`, then [`run`](Self::run) it
    pub fn run_path(&self, path: impl AsRef<Path>) -> Result<BootstrapReport, BootstrapError> {
        let catalog = Catalog::load(path).map_err(|e| {
            log::error!("Catalog could not be loaded: {e}");
            BootstrapError::from(e)
        })?;
        self.run(&catalog)
    }

    /// Validate the catalog and apply it
    ///
    /// # Errors
    ///
    /// Returns `BootstrapError::SchemaConsistency` when a foreign key dangles;
    /// nothing has been executed in that case.
    pub fn run(&self, catalog: &Catalog) -> Result<BootstrapReport, BootstrapError> {
        let started_at = Utc::now();
        let start = Instant::now();

        #[cfg(feature = "tracing")]
        let _span = telemetry::bootstrap_span(catalog.checksum()).entered();

        log::info!(
            "Bootstrapping schema from catalog {} ({} tables)",
            short_checksum(catalog.checksum()),
            catalog.len()
        );

        let plan = match SchemaPlan::from_catalog(catalog, self.options.ddl_options()) {
            Ok(plan) => plan,
            Err(e) => {
                log::error!("Catalog failed validation, no DDL executed: {e}");
                return Err(e.into());
            }
        };

        let mut tracker = PhaseTracker::default();
        let mut errors = Vec::new();
        let mut phases = Vec::new();

        phases.push(self.run_phase(DdlPhase::Tables, plan.phase(DdlPhase::Tables), &[], &mut errors));
        tracker.advance(BootstrapPhase::TablesCreated);

        let existing = if plan.foreign_keys.is_empty() {
            Vec::new()
        } else {
            existing_foreign_keys(self.executor).unwrap_or_else(|e| {
                log::warn!("Could not list existing foreign keys, attempting all: {e}");
                Vec::new()
            })
        };
        phases.push(self.run_phase(
            DdlPhase::ForeignKeys,
            plan.phase(DdlPhase::ForeignKeys),
            &existing,
            &mut errors,
        ));
        tracker.advance(BootstrapPhase::ForeignKeysApplied);

        phases.push(self.run_phase(DdlPhase::Views, plan.phase(DdlPhase::Views), &[], &mut errors));
        tracker.advance(BootstrapPhase::ViewsCreated);

        let seeds = self.run_seeders(catalog);
        if !seeds.is_empty() && seeds.iter().all(|s| s.result.is_ok()) {
            tracker.advance(BootstrapPhase::Seeded);
        }
        tracker.advance(BootstrapPhase::Done);

        let report = BootstrapReport {
            final_phase: tracker.current(),
            history: tracker.into_history(),
            catalog_checksum: catalog.checksum().to_string(),
            phases,
            errors,
            seeds,
            started_at,
            finished_at: Utc::now(),
        };

        log::info!(
            "Bootstrap finished in {:?}: {} executed, {} skipped, {} failed",
            start.elapsed(),
            report.executed(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    fn run_phase(
        &self,
        phase: DdlPhase,
        statements: &[Statement],
        existing_constraints: &[String],
        errors: &mut Vec<StatementExecutionError>,
    ) -> PhaseReport {
        #[cfg(feature = "tracing")]
        let _span = telemetry::phase_span(phase.as_str()).entered();

        let mut report = PhaseReport::new(phase);
        if statements.is_empty() {
            log::info!("Phase {phase}: nothing to do");
            report.committed = true;
            return report;
        }
        log::info!("Phase {phase}: {} statement(s)", statements.len());

        let mut tx = match Transaction::begin(self.executor) {
            Ok(tx) => tx,
            Err(e) => {
                log::error!("Phase {phase}: could not begin transaction: {e}");
                report.failed = statements.len();
                errors.push(control_error(phase, "BEGIN", e.to_string()));
                #[cfg(feature = "metrics")]
                crate::metrics::METRICS.record_phase_failures(phase.as_str(), report.failed);
                return report;
            }
        };

        let mut created_constraints: Vec<String> = Vec::new();
        for statement in statements {
            if let Some(name) = statement.constraint.as_deref() {
                if constraint_exists(existing_constraints, name) || constraint_exists(&created_constraints, name) {
                    log::info!("Constraint {name} already exists, skipping");
                    report.skipped += 1;
                    continue;
                }
            }

            log::debug!("{}", statement.sql);
            match tx.execute_isolated(&statement.sql, &[]) {
                Ok(_) => {
                    report.executed += 1;
                    if statement.kind == StatementKind::CreateTable {
                        log::info!("Table {} ready", statement.table);
                    }
                    if let Some(name) = &statement.constraint {
                        created_constraints.push(name.clone());
                    }
                }
                Err(e) => {
                    let error = StatementExecutionError {
                        phase,
                        kind: Some(statement.kind),
                        table: Some(statement.table.clone()),
                        column: statement.column.clone(),
                        sql: statement.sql.clone(),
                        error: e.to_string(),
                    };
                    log::warn!("Statement failed, continuing: {error}");
                    report.failed += 1;
                    errors.push(error);
                }
            }
        }

        match tx.commit() {
            Ok(()) => report.committed = true,
            Err(e) => {
                log::error!("Phase {phase}: commit failed: {e}");
                errors.push(control_error(phase, "COMMIT", e.to_string()));
            }
        }

        #[cfg(feature = "metrics")]
        if report.failed > 0 {
            crate::metrics::METRICS.record_phase_failures(phase.as_str(), report.failed);
        }

        log::info!(
            "Phase {phase} done: {} executed, {} skipped, {} failed",
            report.executed,
            report.skipped,
            report.failed
        );
        report
    }

    fn run_seeders(&self, catalog: &Catalog) -> Vec<SeedOutcome> {
        self.seeders
            .iter()
            .map(|seeder| {
                let result = seeder.seed(self.executor, catalog).map_err(|e| {
                    log::warn!("Seed step '{}' failed, schema is still usable: {e}", seeder.name());
                    e.to_string()
                });
                if let Ok(summary) = &result {
                    if summary.failed > 0 {
                        log::warn!("Seed step '{}': {} row(s) failed", seeder.name(), summary.failed);
                    }
                }
                SeedOutcome {
                    seeder: seeder.name().to_string(),
                    result,
                }
            })
            .collect()
    }
}

fn control_error(phase: DdlPhase, sql: &str, error: String) -> StatementExecutionError {
    StatementExecutionError {
        phase,
        kind: None,
        table: None,
        column: None,
        sql: sql.to_string(),
        error,
    }
}
