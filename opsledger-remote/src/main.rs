//! OpsLedger reference remote authority.
//!
//! Serves the REST contract the sync engine's HTTP remote speaks, keeping
//! records in memory. Intended for development and demos.
//!
//! Usage:
//!   opsledger-remote --port 8080 --seed seed.json

use anyhow::{Context, Result};
use clap::Parser;
use opsledger_remote::{build_router, RemoteStore, Seed};
use std::fs;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "opsledger-remote")]
#[command(about = "OpsLedger reference remote authority")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// JSON file mapping collection names to initial records
    #[arg(short, long)]
    seed: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let store = match &args.seed {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read seed file {}", path.display()))?;
            let seed: Seed = serde_json::from_str(&raw).context("Failed to parse seed file")?;
            let store = RemoteStore::from_seed(seed);
            info!("Seeded {} records from {}", store.len(), path.display());
            store
        }
        None => RemoteStore::new(),
    };

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("OpsLedger remote listening on http://{}", listener.local_addr()?);

    axum::serve(listener, build_router(store))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;
    Ok(())
}
