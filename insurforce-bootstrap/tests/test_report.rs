//! Tests for the CLI summaries

use insurforce::bootstrap::{schema_status, CsvSeeder};
use insurforce::schema::{CatalogRow, DdlOptions, SchemaPlan};
use insurforce::test_helpers::SimulatedDatabase;
use insurforce::{Bootstrap, Catalog};
use insurforce_bootstrap::report::{render_run, render_status, render_validation};

fn plain() {
    colored::control::set_override(false);
}

fn catalog() -> Catalog {
    Catalog::from_rows(vec![
        CatalogRow::new("villes", "id", "SERIAL").primary_key(),
        CatalogRow::new("villes", "codeVilles", "VARCHAR(50)"),
        CatalogRow::new("clients", "id", "SERIAL").primary_key(),
        CatalogRow::new("clients", "codeVille", "VARCHAR(50)").references("villes(codeVilles)"),
        CatalogRow::new("documents", "id", "SERIAL").primary_key(),
        CatalogRow::new("documents", "idEntite", "INTEGER").references("clients(id) / contrats(id)"),
    ])
}

#[test]
fn test_render_run_lists_phases_and_failures() {
    plain();
    let db = SimulatedDatabase::new();
    db.fail_statements_containing("CREATE OR REPLACE VIEW documents_display");

    let report = Bootstrap::new(&db).run(&catalog()).unwrap();
    let text = render_run(&report);

    assert!(text.contains("Bootstrap Summary"));
    assert!(text.contains("tables"));
    assert!(text.contains("foreign_keys  1 executed, 0 skipped, 0 failed (committed)"));
    assert!(text.contains("Failed statements (1)"));
    assert!(text.contains("[views] documents"));
    assert!(text.contains("final phase: done"));
    assert!(!text.contains("Seeds"));
}

#[test]
fn test_render_run_shows_seed_outcomes() {
    plain();
    let db = SimulatedDatabase::new();
    let seeder = CsvSeeder::new("/nonexistent/insurforce-seeds");

    let report = Bootstrap::new(&db).with_seeder(&seeder).run(&catalog()).unwrap();
    let text = render_run(&report);

    assert!(text.contains("Seeds:"));
    assert!(text.contains("✗ csv: Seed directory /nonexistent/insurforce-seeds is not readable"));
}

#[test]
fn test_render_validation_lists_unique_and_skipped() {
    plain();
    let catalog = catalog();
    let plan = SchemaPlan::from_catalog(&catalog, DdlOptions::default()).unwrap();
    let text = render_validation(&catalog, &plan);

    assert!(text.contains("Catalog is consistent: 3 table(s), 6 column(s)"));
    assert!(text.contains("foreign keys:       1"));
    assert!(text.contains("+ UNIQUE villes.codeVilles"));
    assert!(text.contains("documents.idEntite -> 'clients(id) / contrats(id)' (polymorphic)"));
}

#[test]
fn test_render_status_before_and_after_bootstrap() {
    plain();
    let db = SimulatedDatabase::new();
    let catalog = catalog();
    let plan = SchemaPlan::from_catalog(&catalog, DdlOptions::default()).unwrap();

    let text = render_status(&schema_status(&db, &plan).unwrap());
    assert!(text.contains("tables       0/3 present"));
    assert!(text.contains("missing: villes"));
    assert!(text.contains("Schema is incomplete"));

    Bootstrap::new(&db).run(&catalog).unwrap();
    let text = render_status(&schema_status(&db, &plan).unwrap());
    assert!(text.contains("tables       3/3 present"));
    assert!(text.contains("Schema is up to date"));
}
