//! Recall ingestion (recall-ingest) - Main entry point
//!
//! One-shot runs, the polling daemon and maintenance commands over the
//! local recall store. `search` and `status` go through the query engine
//! so operators see exactly what downstream consumers see.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use recall_common::config::{resolve_root_folder, RecallConfig};
use recall_common::db::{init_database, records};
use recall_ingest::services::{run_daemon, Orchestrator};
use recall_query::{IdentifierInput, QueryService, SearchRequest};
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for recall-ingest
#[derive(Parser, Debug)]
#[command(name = "recall-ingest")]
#[command(about = "Product recall aggregation: ingestion and matching")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "RECALL_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute one ingestion run over all enabled connectors
    Run,
    /// Poll connectors on their configured intervals until interrupted
    Daemon,
    /// Health re-check for one connector; restores it if degraded
    Recheck {
        connector: String,
    },
    /// Link records describing the same product across agencies
    MatchGroups,
    /// Rebuild the trigram search index from stored records
    RebuildIndex,
    /// Print the last run and per-connector health as JSON
    Status,
    /// Search the store and print the result page as JSON
    Search {
        /// Free-text query over product name, brand, description and hazard
        query: Option<String>,
        #[arg(long)]
        upc: Option<String>,
        #[arg(long)]
        model_number: Option<String>,
        #[arg(long)]
        lot_number: Option<String>,
        /// Restrict to an agency (repeatable)
        #[arg(long = "agency")]
        agencies: Vec<String>,
        #[arg(long)]
        date_from: Option<NaiveDate>,
        #[arg(long)]
        date_to: Option<NaiveDate>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        cursor: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!(
        "recall-ingest v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let cli = Cli::parse();

    let config = RecallConfig::load_or_default(cli.config.as_deref()).context("Failed to load configuration")?;
    let root_folder = resolve_root_folder(cli.root_folder.as_deref(), &config);
    let db_path = config.database_path(&root_folder);
    info!("Database: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .context("Failed to open database")?;

    match cli.command {
        Command::Run => {
            let orchestrator = Orchestrator::new(pool, &config).context("Failed to start orchestrator")?;
            let run = orchestrator.run_once().await?;
            print_json(&run)?;
        }
        Command::Daemon => {
            let orchestrator =
                Arc::new(Orchestrator::new(pool, &config).context("Failed to start orchestrator")?);
            let cancel_token = CancellationToken::new();

            let shutdown = cancel_token.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown.cancel();
            });

            let tick = Duration::from_secs(config.ingest.tick_secs.max(1));
            run_daemon(orchestrator, tick, cancel_token).await;
            info!("Shutdown complete");
        }
        Command::Recheck { connector } => {
            let orchestrator = Orchestrator::new(pool, &config).context("Failed to start orchestrator")?;
            let health = orchestrator.recheck(&connector).await?;
            print_json(&health)?;
        }
        Command::MatchGroups => {
            let orchestrator = Orchestrator::new(pool, &config).context("Failed to start orchestrator")?;
            let summary = orchestrator.match_groups().await?;
            print_json(&summary)?;
        }
        Command::RebuildIndex => {
            let indexed = records::rebuild_trigram_index(&pool).await?;
            info!(records = indexed, "Trigram index rebuilt");
        }
        Command::Status => {
            let service = QueryService::new(pool, config.search.clone());
            let status = service.ingestion_status().await?;
            print_json(&status)?;
        }
        Command::Search {
            query,
            upc,
            model_number,
            lot_number,
            agencies,
            date_from,
            date_to,
            limit,
            cursor,
        } => {
            let service = QueryService::new(pool, config.search.clone());
            let request = SearchRequest {
                query,
                identifiers: IdentifierInput {
                    upc,
                    model_number,
                    lot_number,
                },
                agencies,
                date_from,
                date_to,
                limit,
                cursor,
            };
            let response = service.search(&request).await?;
            print_json(&response)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
