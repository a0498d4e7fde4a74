//! # SIS Sync Entry Point
//!
//! `serve` runs the operator API with the background worker and scheduler,
//! `sync` runs one district sync in the foreground, `migrate` applies the
//! database schema.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sis_sync::{
    config::{AppConfig, ConfigLoader},
    db,
    server::run_server,
    sync_orchestrator::{SyncJob, SyncOrchestrator, SyncType},
    telemetry,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// SIS integration and directory sync service
#[derive(Parser)]
#[command(name = "sis-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the operator API, sync worker and scheduler
    Serve,

    /// Run one sync for a district and print the result
    Sync {
        /// District to sync
        #[arg(long)]
        district: Uuid,

        /// Kind of sync to run
        #[arg(long = "type", value_enum, default_value_t = SyncKind::Full)]
        sync_type: SyncKind,
    },

    /// Apply pending database migrations
    Migrate,
}

#[derive(Clone, Copy, ValueEnum)]
enum SyncKind {
    Full,
    Incremental,
}

impl From<SyncKind> for SyncType {
    fn from(kind: SyncKind) -> Self {
        match kind {
            SyncKind::Full => SyncType::Full,
            SyncKind::Incremental => SyncType::Incremental,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    db::migrate(&db).await?;

    match cli.command {
        Commands::Migrate => Ok(()),
        Commands::Serve => {
            let shutdown = shutdown_on_ctrl_c();
            run_server(config, db, shutdown).await
        }
        Commands::Sync {
            district,
            sync_type,
        } => run_sync(&config, db, district, sync_type.into()).await,
    }
}

async fn run_sync(
    config: &AppConfig,
    db: sea_orm::DatabaseConnection,
    district_id: Uuid,
    sync_type: SyncType,
) -> Result<()> {
    let orchestrator = SyncOrchestrator::new(db, config);
    let job = SyncJob::new(district_id, sync_type);

    let result = orchestrator
        .execute_sync_with_cancellation(&job, shutdown_on_ctrl_c())
        .await
        .with_context(|| format!("{} sync failed for district {}", sync_type, district_id))?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        tracing::warn!(
            errors = result.errors.len(),
            "Sync completed with entity errors"
        );
    }
    Ok(())
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            trigger.cancel();
        }
    });
    token
}
