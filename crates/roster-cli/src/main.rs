use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roster_storage::PgRosterStore;
use roster_sync::{SyncConfig, SyncScheduler};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "roster-cli")]
#[command(about = "Keeps the essay platform roster in sync with paid subscriptions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync now and print the run statistics
    Sync {
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the cron scheduler until interrupted
    Schedule,
    /// Run the cron scheduler together with the status API
    Serve {
        /// Port to listen on (defaults to ROSTER_WEB_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Apply roster schema migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync { json: false }) {
        Commands::Sync { json } => {
            let stats = roster_sync::run_sync_once_from_env().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "sync complete: run_id={} subscriptions={} active={} inactive={} classes_created={} created={} updated={} deleted={} errors={}",
                    stats.run_id,
                    stats.total_subscriptions,
                    stats.active,
                    stats.inactive,
                    stats.classes_created,
                    stats.students_created,
                    stats.students_updated,
                    stats.students_deleted,
                    stats.errors.len()
                );
                for err in &stats.errors {
                    eprintln!("  item error: {err}");
                }
            }
        }
        Commands::Schedule => {
            let scheduler = start_scheduler(&SyncConfig::from_env()?).await?;
            shutdown_signal().await;
            scheduler.shutdown().await?;
        }
        Commands::Serve { port } => {
            let config = SyncConfig::from_env()?;
            let scheduler = start_scheduler(&config).await?;
            let state = roster_web::AppState::new(scheduler.clone());
            roster_web::serve(state, port.unwrap_or(config.web_port), shutdown_signal()).await?;
            scheduler.shutdown().await?;
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env()?;
            let store = PgRosterStore::connect(&config.database_url)
                .await
                .context("connecting to roster database")?;
            store.migrate().await?;
            println!("migrations applied");
        }
    }

    Ok(())
}

async fn start_scheduler(config: &SyncConfig) -> Result<SyncScheduler> {
    let scheduler = roster_sync::build_scheduler(config).await?;
    scheduler.start().await?;
    Ok(scheduler)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
