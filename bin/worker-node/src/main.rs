use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use swarm_core::NodeAddress;
use swarm_node::{init_tracing, load_yaml, run_until_ctrl_c, LogFormat, WorkerConfig, WorkerNode};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "worker-node")]
#[command(about = "Worker node: reports its load and stores the readings routed to it")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "SWARM_CONFIG")]
    config: Option<PathBuf>,

    /// First port tried for the session listener
    #[arg(short, long, env = "SWARM_PORT")]
    port: Option<u16>,

    /// Host to bind the session listener to
    #[arg(long, env = "SWARM_BIND_HOST")]
    bind_host: Option<String>,

    /// Node id announced to the dispatcher (random UUID when unset)
    #[arg(long, env = "SWARM_NODE_ID")]
    node_id: Option<String>,

    /// Data store address as host:port
    #[arg(long, env = "SWARM_STORE")]
    store: Option<NodeAddress>,

    /// Report this resource usage instead of sampling the host
    #[arg(long, env = "SWARM_RESOURCE_USAGE")]
    resource_usage: Option<f64>,

    /// Log output format (pretty or json)
    #[arg(long, env = "SWARM_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    let mut config = match &args.config {
        Some(path) => load_yaml::<WorkerConfig>(path)?,
        None => WorkerConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.bind_host {
        config.bind_host = host;
    }
    if args.node_id.is_some() {
        config.node_id = args.node_id;
    }
    if let Some(store) = args.store {
        config.store = store;
    }
    if args.resource_usage.is_some() {
        config.resource_usage = args.resource_usage;
    }

    let mut worker = WorkerNode::new(config)?;
    info!("Starting worker node {}...", worker.node_id());
    run_until_ctrl_c(&mut worker).await?;
    Ok(())
}
