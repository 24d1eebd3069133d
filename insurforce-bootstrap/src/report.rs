//! Console summaries for the bootstrap commands

use std::fmt::Write;

use colored::Colorize;
use insurforce::bootstrap::{BootstrapReport, SchemaStatus};
use insurforce::schema::checksum::short_checksum;
use insurforce::schema::{Catalog, SchemaPlan, SkipReason};

/// Summary printed after `run`
pub fn render_run(report: &BootstrapReport) -> String {
    let mut out = String::new();
    let elapsed = report.finished_at - report.started_at;

    let _ = writeln!(
        out,
        "\n📊 Bootstrap Summary (catalog {})\n",
        short_checksum(&report.catalog_checksum)
    );
    for phase in &report.phases {
        let state = if phase.committed {
            "committed".green()
        } else {
            "not committed".red()
        };
        let _ = writeln!(
            out,
            "  {:<14}{} executed, {} skipped, {} failed ({})",
            phase.phase.as_str(),
            phase.executed,
            phase.skipped,
            phase.failed,
            state
        );
    }

    if !report.seeds.is_empty() {
        let _ = writeln!(out, "\n🌱 Seeds:");
        for seed in &report.seeds {
            match &seed.result {
                Ok(summary) => {
                    let _ = writeln!(
                        out,
                        "  {} {}: {} file(s), {} inserted, {} already present, {} failed",
                        "✓".green(),
                        seed.seeder,
                        summary.files,
                        summary.inserted,
                        summary.existing,
                        summary.failed
                    );
                }
                Err(e) => {
                    let _ = writeln!(out, "  {} {}: {}", "✗".red(), seed.seeder, e);
                }
            }
        }
    }

    if !report.errors.is_empty() {
        let _ = writeln!(out, "\n⚠️  Failed statements ({}):", report.errors.len());
        for error in &report.errors {
            let _ = writeln!(out, "  {} {}", "✗".red(), error);
        }
    }

    let _ = writeln!(
        out,
        "\n📈 {} executed, {} skipped, {} failed; final phase: {} ({}ms)",
        report.executed(),
        report.skipped(),
        report.failed(),
        report.final_phase,
        elapsed.num_milliseconds()
    );
    out
}

/// Summary printed by `validate`
pub fn render_validation(catalog: &Catalog, plan: &SchemaPlan) -> String {
    let mut out = String::new();
    let columns = catalog.columns().count();
    let fk_plan = &plan.foreign_key_plan;

    let _ = writeln!(
        out,
        "{} Catalog is consistent: {} table(s), {} column(s) (checksum {})",
        "✅".green(),
        catalog.len(),
        columns,
        short_checksum(catalog.checksum())
    );
    let _ = writeln!(out, "  foreign keys:       {}", fk_plan.resolved.len());
    let _ = writeln!(out, "  unique constraints: {}", fk_plan.unique_requirements.len());
    for requirement in &fk_plan.unique_requirements {
        let _ = writeln!(out, "    + UNIQUE {}.{}", requirement.table, requirement.column);
    }
    let _ = writeln!(out, "  skipped references: {}", fk_plan.skipped.len());
    for skipped in &fk_plan.skipped {
        let reason = match skipped.reason {
            SkipReason::EmptyReference => "no reference given",
            SkipReason::Polymorphic => "polymorphic",
        };
        let _ = writeln!(
            out,
            "    {} {}.{} -> '{}' ({})",
            "⚠".yellow(),
            skipped.table,
            skipped.column,
            skipped.reference,
            reason
        );
    }
    let _ = writeln!(out, "  statements planned: {}", plan.len());
    out
}

/// Summary printed by `status`
pub fn render_status(status: &SchemaStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n📊 Schema Status\n");

    let sections = [
        ("tables", status.expected_tables, &status.missing_tables),
        ("foreign keys", status.expected_foreign_keys, &status.missing_foreign_keys),
        ("views", status.expected_views, &status.missing_views),
    ];
    for (name, expected, missing) in sections {
        let present = expected.saturating_sub(missing.len());
        let mark = if missing.is_empty() { "✓".green() } else { "⏳".yellow() };
        let _ = writeln!(out, "  {mark} {name:<13}{present}/{expected} present");
        for item in missing {
            let _ = writeln!(out, "      missing: {item}");
        }
    }

    if status.is_complete() {
        let _ = writeln!(out, "\n{}", "Schema is up to date".green());
    } else {
        let _ = writeln!(out, "\n{}", "Schema is incomplete, run `insurforce-bootstrap run`".yellow());
    }
    out
}
