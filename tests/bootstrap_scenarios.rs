//! Bootstrap runs against the simulated database

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use insurforce::bootstrap::{
    schema_status, BootstrapLock, CsvSeeder, FailedStage, SeedStepError, Seeder,
};
use insurforce::schema::{CatalogRow, DdlOptions, DdlPhase, SchemaPlan};
use insurforce::test_helpers::SimulatedDatabase;
use insurforce::{Bootstrap, BootstrapError, BootstrapOptions, BootstrapPhase, Catalog, SqlExecutor};

fn clients_orders_rows() -> Vec<CatalogRow> {
    vec![
        CatalogRow::new("clients", "id", "SERIAL").primary_key().label("Identifiant"),
        CatalogRow::new("clients", "codeClient", "VARCHAR(50)").label("Code client"),
        CatalogRow::new("clients", "nom", "VARCHAR(100)").label("Nom"),
        CatalogRow::new("orders", "id", "SERIAL").primary_key(),
        CatalogRow::new("orders", "clientCode", "VARCHAR(50)").references("clients(codeClient)"),
        CatalogRow::new("orders", "clientId", "INTEGER").references("clients(id)"),
    ]
}

fn clients_orders() -> Catalog {
    Catalog::from_rows(clients_orders_rows())
}

#[test]
fn test_clients_orders_creates_everything() {
    let db = SimulatedDatabase::new();
    let report = Bootstrap::new(&db).run(&clients_orders()).unwrap();

    assert!(report.is_clean(), "unexpected errors: {:?}", report.errors);
    assert_eq!(report.final_phase, BootstrapPhase::Done);
    assert_eq!(
        report.history,
        vec![
            BootstrapPhase::NotStarted,
            BootstrapPhase::TablesCreated,
            BootstrapPhase::ForeignKeysApplied,
            BootstrapPhase::ViewsCreated,
            BootstrapPhase::Done,
        ]
    );

    assert!(db.has_table("clients"));
    assert!(db.has_table("orders"));
    assert_eq!(db.columns("clients"), vec!["id", "codeClient", "nom"]);
    assert!(db.has_constraint("fk_orders_clientCode"));
    assert_eq!(
        db.foreign_key("fk_orders_clientId").as_deref(),
        Some("orders.clientId -> clients(id)")
    );
    assert!(db.has_view("clients_display"));
    assert_eq!(db.view_source("orders_display").as_deref(), Some("orders"));
    assert!(db.has_view("orders_display"));
    assert_eq!(db.comment("clients").as_deref(), Some("REFERENCE"));
    assert_eq!(db.comment("clients.codeClient").as_deref(), Some("Code client"));

    let tables = report.phase(DdlPhase::Tables).unwrap();
    // 2 tables, 2 table comments, 6 column comments
    assert_eq!(tables.executed, 10);
    assert!(tables.committed);
    assert_eq!(report.phase(DdlPhase::ForeignKeys).unwrap().executed, 2);
    assert_eq!(report.phase(DdlPhase::Views).unwrap().executed, 2);
    assert!(!db.in_transaction());
}

#[test]
fn test_second_run_skips_existing_foreign_keys() {
    let db = SimulatedDatabase::new();
    let catalog = clients_orders();

    let first = Bootstrap::new(&db).run(&catalog).unwrap();
    let after_first = db.snapshot();
    let second = Bootstrap::new(&db).run(&catalog).unwrap();

    assert_eq!(db.snapshot(), after_first);
    assert!(second.errors.is_empty(), "unexpected errors: {:?}", second.errors);
    let fks = second.phase(DdlPhase::ForeignKeys).unwrap();
    assert_eq!(fks.skipped, 2);
    assert_eq!(fks.executed, 0);
    assert_eq!(
        second.phase(DdlPhase::Tables).unwrap().executed,
        first.phase(DdlPhase::Tables).unwrap().executed
    );
    assert_eq!(second.catalog_checksum, first.catalog_checksum);
}

#[test]
fn test_row_order_does_not_change_the_schema() {
    let forward = SimulatedDatabase::new();
    Bootstrap::new(&forward).run(&clients_orders()).unwrap();

    let mut rows = clients_orders_rows();
    rows.reverse();
    let reversed = SimulatedDatabase::new();
    let report = Bootstrap::new(&reversed).run(&Catalog::from_rows(rows)).unwrap();

    assert!(report.errors.is_empty(), "unexpected errors: {:?}", report.errors);
    assert_eq!(forward.snapshot(), reversed.snapshot());
}

#[test]
fn test_dangling_reference_executes_nothing() {
    let db = SimulatedDatabase::new();
    let mut rows = clients_orders_rows();
    rows.push(CatalogRow::new("orders", "agentId", "INTEGER").references("agents(id)"));
    rows.push(CatalogRow::new("orders", "villeId", "INTEGER").references("clients(ville)"));

    let err = Bootstrap::new(&db).run(&Catalog::from_rows(rows)).unwrap_err();
    match &err {
        BootstrapError::SchemaConsistency(e) => assert_eq!(e.dangling.len(), 2),
        other => panic!("expected a consistency error, got {other:?}"),
    }
    assert_eq!(err.failed_phase(), Some(BootstrapPhase::Failed(FailedStage::Consistency)));
    assert!(db.statements().is_empty());
}

#[test]
fn test_polymorphic_reference_creates_no_constraint() {
    let db = SimulatedDatabase::new();
    let catalog = Catalog::from_rows(vec![
        CatalogRow::new("clients", "id", "SERIAL").primary_key(),
        CatalogRow::new("contrats", "id", "SERIAL").primary_key(),
        CatalogRow::new("documents", "entiteId", "INTEGER").references("clients(id) / contrats(id)"),
    ]);

    let report = Bootstrap::new(&db).run(&catalog).unwrap();
    assert!(report.errors.is_empty());
    assert_eq!(report.phase(DdlPhase::ForeignKeys).unwrap().executed, 0);
    assert!(db.has_table("documents"));
    assert!(!db.has_constraint("fk_documents_entiteId"));
}

#[test]
fn test_failing_statement_is_isolated() {
    let db = SimulatedDatabase::new();
    db.fail_statements_containing("COMMENT ON COLUMN clients.nom");

    let report = Bootstrap::new(&db).run(&clients_orders()).unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(report.errors.len(), 1);
    let error = &report.errors[0];
    assert_eq!(error.phase, DdlPhase::Tables);
    assert_eq!(error.table.as_deref(), Some("clients"));
    assert_eq!(error.column.as_deref(), Some("nom"));
    assert!(error.error.contains("simulated failure"));

    // the rest of the phase committed
    assert!(report.phase(DdlPhase::Tables).unwrap().committed);
    assert!(db.has_table("orders"));
    assert!(db.comment("clients.nom").is_none());
    assert!(db.comment("orders").is_some());
    assert!(db.has_constraint("fk_orders_clientCode"));
    assert_eq!(report.final_phase, BootstrapPhase::Done);
}

#[cfg(feature = "metrics")]
#[test]
fn test_phase_failures_are_counted_in_metrics() {
    use insurforce::metrics::METRICS;

    let db = SimulatedDatabase::new();
    db.fail_statements_containing("CREATE OR REPLACE VIEW orders_display");

    let report = Bootstrap::new(&db).run(&clients_orders()).unwrap();
    assert_eq!(report.phase(DdlPhase::Views).unwrap().failed, 1);

    let exported = METRICS.gather();
    assert!(exported.contains("insurforce_phase_statements_failed_total"));
    assert!(exported.contains("phase=\"views\""));
}

#[test]
fn test_missing_table_fails_only_its_dependents() {
    let db = SimulatedDatabase::new();
    db.fail_statements_containing("CREATE TABLE IF NOT EXISTS clients ");

    let report = Bootstrap::new(&db).run(&clients_orders()).unwrap();

    assert!(!db.has_table("clients"));
    assert!(db.has_table("orders"));
    // comments on clients, both foreign keys and the clients view fail
    let fk_failures = report.phase(DdlPhase::ForeignKeys).unwrap().failed;
    assert_eq!(fk_failures, 2);
    assert_eq!(report.phase(DdlPhase::Views).unwrap().failed, 1);
    assert!(db.has_view("orders_display"));
    assert_eq!(report.final_phase, BootstrapPhase::Done);
}

#[test]
fn test_existing_constraint_with_different_case_is_skipped() {
    let db = SimulatedDatabase::new();
    Bootstrap::new(&db).run(&clients_orders()).unwrap();
    db.clear_statements();

    let report = Bootstrap::new(&db).run(&clients_orders()).unwrap();

    assert_eq!(report.phase(DdlPhase::ForeignKeys).unwrap().skipped, 2);
    assert!(!db.statements().iter().any(|s| s.starts_with("ALTER TABLE")));
}

#[test]
fn test_commit_failure_is_reported_per_phase() {
    let db = SimulatedDatabase::new();
    db.fail_statements_containing("COMMIT");

    let report = Bootstrap::new(&db).run(&clients_orders()).unwrap();

    assert!(report.phases.iter().all(|p| !p.committed));
    let commit_errors: Vec<_> = report.errors.iter().filter(|e| e.sql == "COMMIT").collect();
    assert_eq!(commit_errors.len(), 3);
    assert!(commit_errors.iter().all(|e| e.kind.is_none()));
    assert!(!db.has_table("clients"));
    assert!(!db.in_transaction());
}

#[test]
fn test_options_skip_views_and_comments() {
    let db = SimulatedDatabase::new();
    let options = BootstrapOptions {
        create_views: false,
        apply_comments: false,
    };

    let report = Bootstrap::new(&db).with_options(options).run(&clients_orders()).unwrap();

    assert_eq!(report.phase(DdlPhase::Tables).unwrap().executed, 2);
    assert_eq!(report.phase(DdlPhase::Views).unwrap().executed, 0);
    assert!(!db.has_view("clients_display"));
    assert_eq!(db.snapshot().comments, 0);
}

#[test]
fn test_csv_seeder_inserts_only_absent_rows() {
    let db = SimulatedDatabase::new();
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("clients.csv"),
        "codeClient,nom,id\nC001,Durand,1\nC002,,2\nC001,Durand bis,3\n",
    )
    .unwrap();
    let seeder = CsvSeeder::new(dir.path());

    let report = Bootstrap::new(&db).with_seeder(&seeder).run(&clients_orders()).unwrap();

    assert!(report.history.contains(&BootstrapPhase::Seeded));
    let summary = report.seeds[0].result.as_ref().unwrap();
    assert_eq!(summary.files, 1);
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.existing, 1);

    let rows = db.rows("clients");
    assert_eq!(rows.len(), 2);
    // columns are stored in table order: id, codeClient, nom
    assert_eq!(rows[1], vec![Some("2".to_string()), Some("C002".to_string()), None]);

    let again = Bootstrap::new(&db).with_seeder(&seeder).run(&clients_orders()).unwrap();
    let summary = again.seeds[0].result.as_ref().unwrap();
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.existing, 3);
    assert_eq!(db.rows("clients").len(), 2);
}

#[test]
fn test_seed_failure_does_not_fail_bootstrap() {
    let db = SimulatedDatabase::new();
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("clients.csv"), "codeClient,inconnu\nC001,x\n").unwrap();
    let seeder = CsvSeeder::new(dir.path());

    let report = Bootstrap::new(&db).with_seeder(&seeder).run(&clients_orders()).unwrap();

    assert_eq!(report.final_phase, BootstrapPhase::Done);
    assert!(!report.history.contains(&BootstrapPhase::Seeded));
    assert!(!report.is_clean());
    assert!(report.seeds[0].result.as_ref().unwrap_err().contains("inconnu"));
    assert!(db.has_view("orders_display"));
}

#[test]
fn test_seeder_reports_unknown_column() {
    let db = SimulatedDatabase::new();
    let catalog = clients_orders();
    Bootstrap::new(&db).run(&catalog).unwrap();

    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("orders.csv"), "id,montant\n1,10\n").unwrap();
    fs::write(dir.path().join("unrelated.csv"), "a\n1\n").unwrap();

    let err = CsvSeeder::new(dir.path()).seed(&db, &catalog).unwrap_err();
    assert!(matches!(err, SeedStepError::UnknownColumn { ref column, .. } if column == "montant"));
}

#[test]
fn test_seed_rows_without_natural_key_are_counted() {
    let db = SimulatedDatabase::new();
    let catalog = clients_orders();
    Bootstrap::new(&db).run(&catalog).unwrap();

    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("clients.csv"), "codeClient,nom\nC001,Martin\n,Sans code\n").unwrap();
    let summary = CsvSeeder::new(dir.path()).seed(&db, &catalog).unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.failed, 1);
}

#[test]
fn test_schema_status_reports_missing_objects() {
    let db = SimulatedDatabase::new();
    let catalog = clients_orders();
    let plan = SchemaPlan::from_catalog(&catalog, DdlOptions::default()).unwrap();

    let before = schema_status(&db, &plan).unwrap();
    assert!(!before.is_complete());
    assert_eq!(before.missing_tables, vec!["clients", "orders"]);
    assert_eq!(before.missing_foreign_keys.len(), 2);
    assert_eq!(before.expected_views, 2);

    Bootstrap::new(&db).run(&catalog).unwrap();
    let after = schema_status(&db, &plan).unwrap();
    assert!(after.is_complete(), "still missing: {after:?}");
}

#[test]
fn test_lock_is_released_on_drop() {
    let db = SimulatedDatabase::new();
    {
        let lock = BootstrapLock::acquire(&db, Duration::from_secs(1)).unwrap();
        Bootstrap::new(lock.executor()).run(&clients_orders()).unwrap();
    }
    let statements = db.statements();
    assert!(statements.first().unwrap().contains("pg_try_advisory_lock"));
    assert!(statements.last().unwrap().contains("pg_advisory_unlock"));
}

#[test]
fn test_lock_times_out_when_held_elsewhere() {
    let db = SimulatedDatabase::new();
    db.hold_lock_elsewhere(true);

    let err = BootstrapLock::acquire(&db, Duration::ZERO).err().unwrap();
    assert!(matches!(err, BootstrapError::LockTimeout(_)));
    assert!(!db.statements().iter().any(|s| s.contains("pg_advisory_unlock")));
}

#[test]
fn test_lock_wait_inside_a_coroutine_resumes_once_released() {
    let db = Arc::new(SimulatedDatabase::new());
    db.hold_lock_elsewhere(true);

    let waiter = Arc::clone(&db);
    let builder = may::coroutine::Builder::new().stack_size(0x40000);
    let handle = may::go!(builder, move || -> Result<usize, BootstrapError> {
        let lock = BootstrapLock::acquire(&*waiter, Duration::from_secs(10))?;
        let report = Bootstrap::new(lock.executor()).run(&clients_orders())?;
        Ok(report.failed())
    })
    .unwrap();

    may::coroutine::sleep(Duration::from_millis(300));
    db.hold_lock_elsewhere(false);

    let failed = handle.join().unwrap().unwrap();
    assert_eq!(failed, 0);
    assert!(db.has_table("orders"));
    assert!(db.statements().iter().filter(|s| s.contains("pg_try_advisory_lock")).count() > 1);
}

#[test]
fn test_executor_trait_object_sees_uncommitted_work() {
    let db = SimulatedDatabase::new();
    let executor: &dyn SqlExecutor = &db;
    executor.execute("BEGIN", &[]).unwrap();
    executor.execute("CREATE TABLE IF NOT EXISTS villes (\"codeVilles\" VARCHAR(10) PRIMARY KEY)", &[]).unwrap();
    let tables = executor
        .query_strings("SELECT table_name::text FROM information_schema.tables WHERE table_type = 'BASE TABLE'", &[])
        .unwrap();
    assert_eq!(tables, vec!["villes"]);
    assert!(!db.has_table("villes"));
    executor.execute("ROLLBACK", &[]).unwrap();
    assert!(!db.has_table("villes"));
}

#[test]
fn test_sample_catalog_and_seeds_bootstrap_cleanly() {
    let db = SimulatedDatabase::new();
    let seeder = CsvSeeder::new(concat!(env!("CARGO_MANIFEST_DIR"), "/seeds"));

    let report = Bootstrap::new(&db)
        .with_seeder(&seeder)
        .run_path(concat!(env!("CARGO_MANIFEST_DIR"), "/catalog/DBTABLES.csv"))
        .unwrap();

    assert!(report.is_clean(), "unexpected errors: {:?}", report.errors);
    assert_eq!(report.final_phase, BootstrapPhase::Done);
    assert!(report.history.contains(&BootstrapPhase::Seeded));
    assert!(db.has_constraint("fk_contrats_codeProduit"));
    assert!(db.has_constraint("fk_societes_societeMere"));
    assert!(!db.has_constraint("fk_documents_idEntite"));
    assert_eq!(db.rows("villes").len(), 6);
    assert_eq!(report.seeds[0].result.as_ref().unwrap().files, 7);
}
