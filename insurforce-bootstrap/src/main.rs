//! Insurforce Bootstrap CLI
//!
//! Creates and checks the Insurforce schema from the column catalog.
//! Meant to run before the application starts, by hand or from a container
//! entrypoint.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use clap::{Parser, Subcommand};
use insurforce::bootstrap::{run_startup_bootstrap, schema_status};
use insurforce::config::AppConfig;
use insurforce::metrics::METRICS;
use insurforce::schema::{DdlOptions, SchemaPlan};
use insurforce::{connect_with_retry, Catalog, PostgresExecutor, RetryPolicy};
use insurforce_bootstrap::report;

#[derive(Parser)]
#[command(name = "insurforce-bootstrap")]
#[command(about = "Schema bootstrap for the Insurforce database")]
#[command(version = "0.1.0")]
struct Cli {
    /// Database connection URL (overrides configuration and DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Configuration file (default: config/config.toml, optional)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing tables, foreign keys and views, then seed
    Run {
        /// Column catalog (CSV or JSON)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Directory of <table>.csv seed files
        #[arg(long)]
        seeds: Option<PathBuf>,

        /// External seed command, e.g. --seed-command python scripts/init_data.py
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        seed_command: Option<Vec<String>>,

        /// Do not create the <table>_display views
        #[arg(long)]
        no_views: bool,

        /// Do not write table and column comments
        #[arg(long)]
        no_comments: bool,

        /// Skip the seed step
        #[arg(long)]
        no_seed: bool,

        /// Write Prometheus metrics of the run to this file
        #[arg(long)]
        metrics_file: Option<PathBuf>,
    },

    /// Print the DDL script without touching the database
    Plan {
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Write the script to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long)]
        no_views: bool,
    },

    /// Load the catalog and check its foreign-key references
    Validate {
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Compare the catalog with the database
    Status {
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    match execute(cli) {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("❌ Error: {e:#}");
            process::exit(1);
        }
    }
}

fn execute(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => AppConfig::load().context("Failed to load configuration")?,
    };
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    let quiet = cli.quiet;

    match cli.command {
        Commands::Run {
            catalog,
            seeds,
            seed_command,
            no_views,
            no_comments,
            no_seed,
            metrics_file,
        } => {
            if let Some(path) = catalog {
                config.bootstrap.catalog_path = path;
            }
            if seeds.is_some() {
                config.bootstrap.seeds_dir = seeds;
            }
            if seed_command.is_some() {
                config.bootstrap.seed_command = seed_command;
            }
            if no_seed {
                config.bootstrap.seeds_dir = None;
                config.bootstrap.seed_command = None;
            }
            config.bootstrap.create_views &= !no_views;
            config.bootstrap.apply_comments &= !no_comments;
            handle_run(&config, quiet, metrics_file.as_deref())
        }
        Commands::Plan {
            catalog,
            output,
            no_views,
        } => {
            let options = DdlOptions {
                apply_comments: config.bootstrap.apply_comments,
                create_views: config.bootstrap.create_views && !no_views,
            };
            handle_plan(&catalog.unwrap_or(config.bootstrap.catalog_path), options, output)
        }
        Commands::Validate { catalog } => {
            handle_validate(&catalog.unwrap_or(config.bootstrap.catalog_path), quiet)
        }
        Commands::Status { catalog } => {
            if let Some(path) = catalog {
                config.bootstrap.catalog_path = path;
            }
            handle_status(&config)
        }
    }
}

fn handle_run(config: &AppConfig, quiet: bool, metrics_file: Option<&Path>) -> anyhow::Result<()> {
    let result = run_startup_bootstrap(config);
    if let Some(path) = metrics_file {
        fs::write(path, METRICS.gather())
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }
    let report = result?;
    if !quiet {
        print!("{}", report::render_run(&report));
        if report.is_clean() {
            println!("✅ Success");
        } else {
            println!("⚠️  Finished with errors, see above");
        }
    }
    Ok(())
}

fn handle_plan(path: &Path, options: DdlOptions, output: Option<PathBuf>) -> anyhow::Result<()> {
    let catalog = Catalog::load(path)?;
    let plan = SchemaPlan::from_catalog(&catalog, options)?;
    let script = plan.to_sql_script();

    match output {
        Some(out) => {
            fs::write(&out, script).with_context(|| format!("Failed to write {}", out.display()))?;
            println!("Wrote {} statement(s) to {}", plan.len(), out.display());
        }
        None => print!("{script}"),
    }
    Ok(())
}

fn handle_validate(path: &Path, quiet: bool) -> anyhow::Result<()> {
    let catalog = Catalog::load(path)?;
    let plan = SchemaPlan::from_catalog(&catalog, DdlOptions::default())?;
    if !quiet {
        print!("{}", report::render_validation(&catalog, &plan));
    }
    Ok(())
}

fn handle_status(config: &AppConfig) -> anyhow::Result<()> {
    let catalog = Catalog::load(&config.bootstrap.catalog_path)?;
    let options = DdlOptions {
        apply_comments: config.bootstrap.apply_comments,
        create_views: config.bootstrap.create_views,
    };
    let plan = SchemaPlan::from_catalog(&catalog, options)?;

    let client = connect_with_retry(
        &config.database.url,
        RetryPolicy {
            max_attempts: 1,
            ..config.database.retry_policy()
        },
    )?;
    let executor = PostgresExecutor::new(client);
    let status = schema_status(&executor, &plan)?;
    print!("{}", report::render_status(&status));
    Ok(())
}
