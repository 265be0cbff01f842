use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use swarm_node::{init_tracing, load_yaml, run_until_ctrl_c, Dispatcher, DispatcherConfig, LogFormat};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "dispatcher")]
#[command(about = "Routes clients and sensor readings to the least-loaded worker node")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "SWARM_CONFIG")]
    config: Option<PathBuf>,

    /// First port tried for the client listener
    #[arg(short, long, env = "SWARM_PORT")]
    port: Option<u16>,

    /// Host to bind the client listener to
    #[arg(long, env = "SWARM_BIND_HOST")]
    bind_host: Option<String>,

    /// Seconds a node may stay silent before it is evicted
    #[arg(long, env = "SWARM_EXPIRY_WINDOW")]
    expiry_window: Option<f64>,

    /// Log output format (pretty or json)
    #[arg(long, env = "SWARM_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    let mut config = match &args.config {
        Some(path) => load_yaml::<DispatcherConfig>(path)?,
        None => DispatcherConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.bind_host {
        config.bind_host = host;
    }
    if let Some(secs) = args.expiry_window {
        config.expiry_window = std::time::Duration::try_from_secs_f64(secs)?;
    }

    info!("Starting dispatcher...");
    info!("  - Heartbeat: first after {:?}, then every {:?}", config.heartbeat_initial_delay, config.heartbeat_interval);
    info!("  - Sweep every {:?}, expiry window {:?}", config.sweep_interval, config.expiry_window);

    let mut dispatcher = Dispatcher::new(config)?;
    run_until_ctrl_c(&mut dispatcher).await?;

    info!("Final metrics:\n{}", dispatcher.metrics().gather()?);
    Ok(())
}
