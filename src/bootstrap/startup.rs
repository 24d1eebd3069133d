//! Bootstrap on application startup

use std::time::Duration;

use crate::config::AppConfig;
use crate::connection::connect_with_retry;
use crate::executor::PostgresExecutor;

use super::error::BootstrapError;
use super::lock::BootstrapLock;
use super::orchestrator::{Bootstrap, BootstrapOptions, BootstrapReport};
use super::seed::{CommandSeeder, CsvSeeder, Seeder};

/// Connect, lock, load the catalog, apply it and seed
///
/// Intended as one of the first calls of a process, before it serves
/// traffic. The connection is retried while the database starts up; the
/// advisory lock keeps concurrent instances from racing and is released
/// before returning.
///
/// # Errors
///
/// Fails when the database stays unreachable, the lock cannot be taken in
/// time, or the catalog is unreadable or inconsistent. Statement and seed
/// failures are only reported.
///
/// # Example
///
/// ```rust,no_run
/// use insurforce::{config::AppConfig, bootstrap::run_startup_bootstrap};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = AppConfig::load()?;
///     let report = run_startup_bootstrap(&config)?;
///     println!("schema ready: {}", report.final_phase);
///     Ok(())
/// }
/// ```
pub fn run_startup_bootstrap(config: &AppConfig) -> Result<BootstrapReport, BootstrapError> {
    let client = connect_with_retry(&config.database.url, config.database.retry_policy())?;
    let executor = PostgresExecutor::new(client);

    let lock = BootstrapLock::acquire(
        &executor,
        Duration::from_secs(config.bootstrap.lock_timeout_seconds),
    )?;

    let options = BootstrapOptions {
        create_views: config.bootstrap.create_views,
        apply_comments: config.bootstrap.apply_comments,
    };

    let csv_seeder = config.bootstrap.seeds_dir.as_ref().map(CsvSeeder::new);
    let command_seeder = match &config.bootstrap.seed_command {
        Some(command) => match CommandSeeder::from_command(command, &config.database.url) {
            Ok(seeder) => Some(seeder),
            Err(e) => {
                log::warn!("Seed command ignored: {e}");
                None
            }
        },
        None => None,
    };

    let mut bootstrap = Bootstrap::new(lock.executor()).with_options(options);
    if let Some(seeder) = &csv_seeder {
        bootstrap = bootstrap.with_seeder(seeder as &dyn Seeder);
    }
    if let Some(seeder) = &command_seeder {
        bootstrap = bootstrap.with_seeder(seeder as &dyn Seeder);
    }

    let report = bootstrap.run_path(&config.bootstrap.catalog_path)?;
    drop(lock);
    Ok(report)
}
