use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use swarm_node::{init_tracing, load_yaml, run_until_ctrl_c, DataStore, LogFormat, StoreConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "data-store")]
#[command(about = "In-memory store for parsed sensor records")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "SWARM_CONFIG")]
    config: Option<PathBuf>,

    /// First port tried for the listener
    #[arg(short, long, env = "SWARM_PORT")]
    port: Option<u16>,

    /// Host to bind the listener to
    #[arg(long, env = "SWARM_BIND_HOST")]
    bind_host: Option<String>,

    /// Records kept before the oldest are dropped
    #[arg(long, env = "SWARM_STORE_CAPACITY")]
    capacity: Option<usize>,

    /// Log output format (pretty or json)
    #[arg(long, env = "SWARM_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    let mut config = match &args.config {
        Some(path) => load_yaml::<StoreConfig>(path)?,
        None => StoreConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.bind_host {
        config.bind_host = host;
    }
    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }

    info!("Starting data store...");
    let mut store = DataStore::new(config)?;
    run_until_ctrl_c(&mut store).await?;
    info!("{} records held at shutdown", store.records().len());
    Ok(())
}
