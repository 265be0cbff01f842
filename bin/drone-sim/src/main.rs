use anyhow::Result;
use clap::Parser;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use swarm_core::NodeAddress;
use swarm_node::{init_tracing, DispatcherClient, LogFormat, ShutdownListener, ShutdownSignal};
use tracing::{debug, info, warn};

mod profile;

use profile::{EnvironmentReading, Region};

const LANDING_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "drone-sim")]
#[command(about = "Simulated drones submitting environment readings to the dispatcher")]
struct Args {
    /// Dispatcher address as host:port
    #[arg(short, long, env = "SWARM_DISPATCHER", default_value = "127.0.0.1:8080")]
    dispatcher: NodeAddress,

    /// Regions to fly drones in (comma separated); all regions when unset
    #[arg(short, long, value_delimiter = ',')]
    region: Vec<Region>,

    /// Seconds between readings; each drone picks 2-5s when unset
    #[arg(short, long)]
    interval: Option<f64>,

    /// Stop each drone after this many readings
    #[arg(short, long)]
    count: Option<u64>,

    /// Log output format (pretty or json)
    #[arg(long, env = "SWARM_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    let regions = if args.region.is_empty() {
        Region::ALL.to_vec()
    } else {
        args.region.clone()
    };
    let fixed_interval = args.interval.map(Duration::try_from_secs_f64).transpose()?;

    let shutdown = ShutdownSignal::new();
    let mut drones = Vec::new();
    for region in regions {
        let mut rng = StdRng::from_entropy();
        let interval = fixed_interval.unwrap_or_else(|| Duration::from_secs(rng.gen_range(2..=5)));
        info!("Drone {} reporting every {:?} to {}", region, interval, args.dispatcher);

        drones.push(tokio::spawn(fly(
            region,
            args.dispatcher.clone(),
            interval,
            args.count,
            rng,
            shutdown.subscribe(),
        )));
    }

    let landing = join_all(drones);
    tokio::pin!(landing);
    tokio::select! {
        _ = &mut landing => info!("All drones landed"),
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Landing drones...");
            shutdown.trigger();
            if tokio::time::timeout(LANDING_GRACE, &mut landing).await.is_err() {
                warn!("Drones still busy after {:?}; exiting", LANDING_GRACE);
            }
        }
    }

    Ok(())
}

async fn fly(
    region: Region,
    dispatcher: NodeAddress,
    interval: Duration,
    count: Option<u64>,
    mut rng: StdRng,
    mut shutdown: ShutdownListener,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    let mut sent = 0u64;

    while count.map_or(true, |count| sent < count) {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {}
        }

        let raw = region.format(&EnvironmentReading::random(&mut rng));
        match submit(&dispatcher, &raw).await {
            Ok(ack) => debug!("Drone {} sent {}: {}", region, raw, ack),
            Err(e) => warn!("Drone {} could not submit {}: {}", region, raw, e),
        }
        sent += 1;
    }

    debug!("Drone {} landed after {} readings", region, sent);
}

async fn submit(dispatcher: &NodeAddress, raw: &str) -> swarm_node::Result<String> {
    let mut client = DispatcherClient::connect(dispatcher).await?;
    let ack = client.submit_reading(raw).await;
    client.close().await?;
    ack
}
