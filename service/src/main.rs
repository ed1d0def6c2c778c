#![deny(
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used
)]
#![allow(clippy::print_stdout)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use congress_sync::config::Config;
use congress_sync::congress::ApiClient;
use congress_sync::endpoints::EndpointCatalog;
use congress_sync::http::ReqwestTransport;
use congress_sync::sink::JsonlSink;
use congress_sync::state::{FileStateStore, StateManager};
use congress_sync::sync::{SyncContext, SyncOrchestrator, SyncSettings};

#[derive(Parser)]
#[command(name = "congress-sync", version, about = "Incremental Congress.gov sync")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one sync pass (default)
    Sync,
    /// Write schema.json describing every table
    Schema,
    /// Print the stored checkpoint
    State,
    /// Restart one endpoint for one congress from offset 0
    Reset {
        #[arg(long)]
        endpoint: String,
        #[arg(long)]
        congress: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load and validate configuration first (fail-fast)
    let config = Config::load_from(&cli.config).map_err(|e| anyhow::anyhow!("{e}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "congress-sync starting up"
    );

    let catalog = EndpointCatalog::congress_gov().select(&config.sync.endpoints);
    let state = Arc::new(StateManager::new(
        Arc::new(FileStateStore::new(&config.state.path)),
        config.sync.starting_congress_number,
    ));

    match cli.command.unwrap_or(Command::Sync) {
        Command::Sync => run_sync(&config, catalog, state).await,
        Command::Schema => {
            let sink = JsonlSink::new(&config.output.dir);
            let path = sink.write_schema(&catalog.schema_manifest()).await?;
            println!("{}", path.display());
            Ok(())
        }
        Command::State => {
            let snapshot = state.load().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Command::Reset { endpoint, congress } => {
            if catalog.get(&endpoint).is_none() {
                bail!("unknown endpoint '{endpoint}'");
            }
            state.load().await?;
            state.reset_cursor(&endpoint, congress, None).await;
            state.checkpoint().await?;
            tracing::info!(endpoint = %endpoint, congress, "cursor reset");
            Ok(())
        }
    }
}

async fn run_sync(config: &Config, catalog: EndpointCatalog, state: Arc<StateManager>) -> Result<()> {
    let transport = ReqwestTransport::new(
        Duration::from_secs(config.api.timeout_secs),
        config.api.requests_per_hour,
    )
    .context("building HTTP client")?;
    let client = ApiClient::new(Arc::new(transport), &config.api.base_url, &config.api.key)
        .with_retry_policy(config.retry.policy());

    let sink = JsonlSink::new(&config.output.dir);
    sink.write_schema(&catalog.schema_manifest()).await?;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current pages");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let settings = SyncSettings::from_config(config, chrono::Utc::now().date_naive());
    let orchestrator = SyncOrchestrator::new(SyncContext {
        client,
        catalog,
        state,
        sink: Arc::new(sink),
        settings,
        cancel,
    });

    let report = orchestrator.run().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.failed_endpoints.is_empty() {
        bail!(
            "{} endpoint(s) failed: {}",
            report.failed_endpoints.len(),
            report
                .failed_endpoints
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(())
}
