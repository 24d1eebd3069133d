//! Applying a catalog to a live database.
//!
//! - [`Bootstrap`]: runs the table, foreign-key and view phases, then seeders
//! - [`BootstrapLock`]: advisory lock against concurrent bootstraps
//! - [`introspect`]: existing constraints and schema status
//! - [`run_startup_bootstrap`]: the whole sequence from configuration

pub mod error;
pub mod introspect;
pub mod lock;
pub mod orchestrator;
pub mod seed;
pub mod startup;
pub mod state;

pub use error::{BootstrapError, SeedStepError, StatementExecutionError};
pub use introspect::{schema_status, SchemaStatus};
pub use lock::BootstrapLock;
pub use orchestrator::{Bootstrap, BootstrapOptions, BootstrapReport, PhaseReport, SeedOutcome};
pub use seed::{CommandSeeder, CsvSeeder, SeedSummary, Seeder};
pub use startup::run_startup_bootstrap;
pub use state::{BootstrapPhase, FailedStage};
