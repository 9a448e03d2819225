use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "reefwatch")]
#[command(about = "ReefWatch coral health ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute one pipeline run and exit.
    Run,
    /// Run the long-lived scheduler loop until interrupted.
    Schedule,
    /// Serve the read-only query API.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = reefwatch_pipeline::run_pipeline_once_from_env().await?;
            println!(
                "run complete: run_id={} observations={} merged={} persisted={} sst_origin={:?}",
                summary.run_id,
                summary.observations,
                summary.merged,
                summary.persisted,
                summary.observation_origin,
            );
        }
        Commands::Schedule => {
            reefwatch_pipeline::run_scheduler_from_env().await?;
        }
        Commands::Serve => {
            let config = reefwatch_pipeline::PipelineConfig::from_env();
            let store = reefwatch_storage::MetricStore::connect(&config.store_config()).await?;
            store.ensure_schema().await?;
            reefwatch_api::serve_from_env(store).await?;
        }
    }

    Ok(())
}
