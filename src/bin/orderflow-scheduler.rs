//! # Orderflow Scheduler
//!
//! Runs the poll / claim / dispatch loop against PostgreSQL until interrupted.

use anyhow::Context;
use clap::{Parser, Subcommand};
use orderflow::config::ConfigManager;
use orderflow::database::{DatabaseConnection, DatabaseMigrations, PgStore, Store};
use orderflow::logging::init_structured_logging;
use orderflow::orchestration::{HttpDispatcher, JobScheduler, MappingRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "orderflow-scheduler")]
#[command(about = "Dispatch ready orderflow jobs to their workers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Environment to load (development, test, production, ...)
    #[arg(short, long)]
    environment: Option<String>,

    /// Configuration directory (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Skip applying database migrations on startup
    #[arg(long)]
    skip_migrations: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C (default)
    Run,
    /// Apply outstanding migrations and exit
    Migrate,
    /// Load and validate configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let environment = cli
        .environment
        .clone()
        .unwrap_or_else(ConfigManager::detect_environment);
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &environment)
        .context("failed to load configuration")?;
    let config = manager.config();

    init_structured_logging(&config.logging);

    match cli.command.unwrap_or(Command::Run) {
        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(config)?);
            Ok(())
        }
        Command::Migrate => {
            let connection = DatabaseConnection::connect(&config.database)
                .await
                .context("failed to connect to database")?;
            apply_migrations(&connection, Path::new(&config.database.migrations_path)).await?;
            connection.close().await;
            Ok(())
        }
        Command::Run => {
            let connection = DatabaseConnection::connect(&config.database)
                .await
                .context("failed to connect to database")?;
            if !cli.skip_migrations {
                apply_migrations(&connection, Path::new(&config.database.migrations_path)).await?;
            }

            if !config.scheduler.enabled {
                warn!("Scheduler disabled by configuration, exiting");
                connection.close().await;
                return Ok(());
            }

            let store: Arc<dyn Store> = Arc::new(PgStore::new(connection.pool().clone()));
            let dispatcher = Arc::new(HttpDispatcher::new(&config.dispatch)?);
            let scheduler = Arc::new(JobScheduler::new(
                config.scheduler.clone(),
                store,
                Arc::new(MappingRegistry::new()),
                dispatcher,
            ));

            let handle = scheduler.start();
            info!(
                environment = %manager.environment(),
                service = %config.telemetry.service_name,
                "Scheduler running, press Ctrl-C to stop"
            );

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            info!("Shutdown signal received");

            handle.shutdown().await?;
            connection.close().await;
            Ok(())
        }
    }
}

async fn apply_migrations(connection: &DatabaseConnection, dir: &Path) -> anyhow::Result<()> {
    let applied = DatabaseMigrations::run_all(connection.pool(), dir)
        .await
        .with_context(|| format!("failed to apply migrations from {}", dir.display()))?;
    info!(applied = applied.len(), "Database migrations up to date");
    Ok(())
}
