//! Prometheus metrics for the dispatcher

use crate::error::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Counters and gauges describing dispatcher traffic
#[derive(Clone)]
pub struct DispatchMetrics {
    /// Client requests by message type
    pub requests_total: IntCounterVec,
    /// Nodes currently in the registry
    pub registered_nodes: IntGauge,
    /// Nodes removed by the expiry sweep
    pub evicted_nodes_total: IntCounter,
    /// Discovery replies dropped as malformed
    pub malformed_reports_total: IntCounter,
    registry: Arc<Registry>,
}

impl DispatchMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let requests_total = IntCounterVec::new(
            Opts::new("swarm_dispatcher_requests_total", "Client requests by message type"),
            &["type"],
        )?;
        let registered_nodes = IntGauge::new(
            "swarm_dispatcher_registered_nodes",
            "Worker nodes currently registered",
        )?;
        let evicted_nodes_total = IntCounter::new(
            "swarm_dispatcher_evicted_nodes_total",
            "Worker nodes evicted for missing heartbeats",
        )?;
        let malformed_reports_total = IntCounter::new(
            "swarm_dispatcher_malformed_reports_total",
            "Discovery replies dropped as malformed",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(registered_nodes.clone()))?;
        registry.register(Box::new(evicted_nodes_total.clone()))?;
        registry.register(Box::new(malformed_reports_total.clone()))?;

        Ok(Self {
            requests_total,
            registered_nodes,
            evicted_nodes_total,
            malformed_reports_total,
            registry,
        })
    }

    pub fn record_request(&self, kind: &str) {
        self.requests_total.with_label_values(&[kind]).inc();
    }

    pub fn set_registered(&self, count: usize) {
        self.registered_nodes.set(count as i64);
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
