use std::sync::Arc;

use anyhow::Result;
use bjh_core::RunStage;
use bjh_storage::{FileStore, KeyValueStore};
use bjh_sync::SyncConfig;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "bjh-cli")]
#[command(about = "Biomedical Job Hub ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the pipeline once and persist the active job set.
    Sync,
    /// Serve /api/jobs and /api/cron.
    Serve,
    /// Print the latest persisted run report as markdown.
    Report,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let report = bjh_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} fetched={} new={} active={} errors={}",
                report.run_id,
                report.total_fetched,
                report.new_postings,
                report.total_active,
                report.errors.len()
            );
        }
        Commands::Serve => {
            bjh_web::serve_from_env().await?;
        }
        Commands::Report => {
            let config = SyncConfig::from_env();
            let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(config.store_dir));
            match bjh_sync::latest_report(store.as_ref()).await? {
                Some(report) => {
                    println!("{}", bjh_sync::report_markdown(&report));
                    if report.stage == RunStage::Failed {
                        std::process::exit(1);
                    }
                }
                None => eprintln!("no sync run has been recorded yet"),
            }
        }
    }

    Ok(())
}
