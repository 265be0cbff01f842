//! Dispatcher: routes client requests to the least-loaded worker

use crate::config::DispatcherConfig;
use crate::error::{NodeError, Result};
use crate::metrics::DispatchMetrics;
use crate::periodic::spawn_periodic;
use crate::server::{spawn_accept_loop, spawn_group_loop, Handler};
use crate::service::{Running, Service};
use crate::shutdown::{ShutdownSignal, TaskSet};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use swarm_core::{
    LoadBalancingStrategy, Message, MessageKind, NodeAddress, NodeReport, ServiceRegistry, Upsert,
};
use swarm_transport::{Broadcast, GroupTransport, TcpListenerTransport};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Reply text when no worker is registered
pub const NO_SERVERS_AVAILABLE: &str = "no servers available";

/// Payload of the heartbeat solicitation
const DISCOVERY_PAYLOAD: &str = "who is there";

/// Request handling and registry upkeep, independent of any socket
pub struct DispatchService {
    registry: ServiceRegistry,
    broadcaster: Arc<dyn Broadcast>,
    metrics: DispatchMetrics,
}

impl DispatchService {
    pub fn new(registry: ServiceRegistry, broadcaster: Arc<dyn Broadcast>, metrics: DispatchMetrics) -> Self {
        Self {
            registry,
            broadcaster,
            metrics,
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Answer one client request
    pub async fn handle(&self, request: &Message) -> Message {
        let kind = MessageKind::parse(request.kind());
        self.metrics
            .record_request(kind.map(|k| k.as_str()).unwrap_or("UNKNOWN"));

        match kind {
            Some(MessageKind::UserRequest) => self.assign_node().await,
            Some(MessageKind::DroneRequest) => self.forward_reading(request.payload()).await,
            _ => {
                debug!("Unknown request type: {}", request.kind());
                Message::new(
                    MessageKind::UnknownType.as_str(),
                    format!("unknown message type: {}", request.kind()),
                )
            }
        }
    }

    async fn assign_node(&self) -> Message {
        match self.registry.select(LoadBalancingStrategy::LeastConnections).await {
            Some(entry) => {
                info!("Assigned client to node {} at {}", entry.node_id, entry.address);
                Message::new(MessageKind::DatacenterResponse.as_str(), entry.address.to_string())
            }
            None => {
                warn!("Client request with no registered nodes");
                Message::new(MessageKind::DatacenterResponse.as_str(), NO_SERVERS_AVAILABLE)
            }
        }
    }

    /// Tag the raw reading with the least-used node and rebroadcast it.
    /// The acknowledgement does not wait for the worker.
    async fn forward_reading(&self, raw: &str) -> Message {
        let Some(entry) = self.registry.select(LoadBalancingStrategy::LeastUsage).await else {
            warn!("Drone reading with no registered nodes");
            return Message::new(MessageKind::DatacenterError.as_str(), NO_SERVERS_AVAILABLE);
        };

        let tagged = match Message::new(entry.node_id.as_str(), raw).encode() {
            Ok(tagged) => tagged,
            Err(e) => return Message::new(MessageKind::DatacenterError.as_str(), e.to_string()),
        };

        match self
            .broadcaster
            .broadcast(&Message::new(MessageKind::DroneRequest.as_str(), tagged))
            .await
        {
            Ok(()) => {
                debug!("Forwarded reading to node {}", entry.node_id);
                Message::new(
                    MessageKind::DatacenterResponse.as_str(),
                    format!("forwarded to node {}", entry.node_id),
                )
            }
            Err(e) => {
                warn!("Failed to forward reading to node {}: {}", entry.node_id, e);
                Message::new(
                    MessageKind::DatacenterError.as_str(),
                    format!("failed to forward reading: {}", e),
                )
            }
        }
    }

    /// Apply one group message. Load reports are upserted with the host taken
    /// from the datagram sender; everything else is ignored.
    pub async fn apply_discovery(&self, sender: SocketAddr, message: &Message) -> Option<Upsert> {
        let kind = MessageKind::parse(message.kind())?;
        if !kind.is_load_report() {
            return None;
        }

        let report = match NodeReport::parse(message.payload()) {
            Ok(report) => report,
            Err(e) => {
                self.metrics.malformed_reports_total.inc();
                warn!("Dropping report from {}: {}", sender, e);
                return None;
            }
        };

        let address = NodeAddress::new(sender.ip().to_string(), report.port);
        let upsert = self
            .registry
            .upsert(
                &report.node_id,
                address,
                report.connection_count,
                report.resource_usage,
            )
            .await;
        if upsert == Upsert::Inserted {
            info!("Node {} joined from {}", report.node_id, sender.ip());
        }
        self.metrics.set_registered(self.registry.len().await);
        Some(upsert)
    }

    /// Broadcast a heartbeat solicitation
    pub async fn solicit(&self) {
        let request = Message::new(MessageKind::DiscoveryRequest.as_str(), DISCOVERY_PAYLOAD);
        match self.broadcaster.broadcast(&request).await {
            Ok(()) => debug!("Sent discovery request"),
            Err(e) => warn!("Failed to send discovery request: {}", e),
        }
    }

    /// Evict nodes that missed the expiry window
    pub async fn sweep(&self) -> Vec<String> {
        let removed = self
            .registry
            .evict_stale(Instant::now(), self.registry.expiry_window())
            .await;
        for node_id in &removed {
            info!("Evicted node {} after missing heartbeats", node_id);
        }
        self.metrics.evicted_nodes_total.inc_by(removed.len() as u64);
        self.metrics.set_registered(self.registry.len().await);
        removed
    }
}

#[async_trait]
impl Handler for DispatchService {
    type Session = ();

    async fn handle(&self, _session: &mut (), request: &Message) -> Message {
        DispatchService::handle(self, request).await
    }
}

/// The dispatcher role: client listener, group drain, heartbeat and sweep
pub struct Dispatcher {
    config: DispatcherConfig,
    registry: ServiceRegistry,
    metrics: DispatchMetrics,
    running: Option<Running>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: ServiceRegistry::new(config.expiry_window),
            metrics: DispatchMetrics::new()?,
            config,
            running: None,
        })
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }
}

#[async_trait]
impl Service for Dispatcher {
    fn name(&self) -> &'static str {
        "dispatcher"
    }

    async fn start(&mut self) -> Result<SocketAddr> {
        if self.running.is_some() {
            return Err(NodeError::AlreadyStarted(self.name()));
        }

        let config = &self.config;
        let listener =
            TcpListenerTransport::bind_with_retry(&config.bind_host, config.port, config.max_bind_attempts)
                .await?;
        let local_addr = listener.local_addr();
        let group = GroupTransport::join(&config.group).await?;

        let service = Arc::new(DispatchService::new(
            self.registry.clone(),
            Arc::new(group.sender()),
            self.metrics.clone(),
        ));
        let shutdown = ShutdownSignal::new();
        let mut tasks = TaskSet::new();

        tasks.push(
            "accept",
            spawn_accept_loop(listener, Arc::clone(&service), shutdown.clone()),
        );

        let drain = Arc::clone(&service);
        tasks.push(
            "group-drain",
            spawn_group_loop("group-drain", group, shutdown.subscribe(), move |sender, message| {
                let service = Arc::clone(&drain);
                async move {
                    service.apply_discovery(sender, &message).await;
                }
            }),
        );

        let heartbeat = Arc::clone(&service);
        tasks.push(
            "heartbeat",
            spawn_periodic(
                "heartbeat",
                config.heartbeat_initial_delay,
                config.heartbeat_interval,
                shutdown.subscribe(),
                move || {
                    let service = Arc::clone(&heartbeat);
                    async move { service.solicit().await }
                },
            ),
        );

        let sweeper = Arc::clone(&service);
        tasks.push(
            "sweep",
            spawn_periodic(
                "sweep",
                config.sweep_interval,
                config.sweep_interval,
                shutdown.subscribe(),
                move || {
                    let service = Arc::clone(&sweeper);
                    async move {
                        service.sweep().await;
                    }
                },
            ),
        );

        info!(
            "Dispatcher started on {}, discovery group {}:{}",
            local_addr, config.group.group, config.group.port
        );
        self.running = Some(Running {
            shutdown,
            tasks,
            local_addr,
        });
        Ok(local_addr)
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        running.stop(self.name(), self.config.shutdown_grace).await;
        Ok(())
    }
}
