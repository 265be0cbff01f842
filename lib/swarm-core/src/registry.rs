//! Service registry of worker nodes known to the dispatcher

use crate::balancer::LoadBalancingStrategy;
use crate::NodeAddress;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// One worker as last reported on the group channel
#[derive(Clone, Debug, PartialEq)]
pub struct RegistryEntry {
    pub node_id: String,
    pub address: NodeAddress,
    pub connection_count: u32,
    pub resource_usage: f64,
    pub last_seen: Instant,
    /// Registration order, used to break selection ties
    pub sequence: u64,
}

impl RegistryEntry {
    /// Stale once strictly more than `window` has passed since the last report
    pub fn is_stale(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > window
    }
}

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

#[derive(Default)]
struct Entries {
    by_id: HashMap<String, RegistryEntry>,
    next_sequence: u64,
}

impl Entries {
    fn evict(&mut self, now: Instant, window: Duration) -> Vec<String> {
        let mut removed = Vec::new();
        self.by_id.retain(|id, entry| {
            let stale = entry.is_stale(now, window);
            if stale {
                removed.push(id.clone());
            }
            !stale
        });
        removed
    }
}

/// ServiceRegistry maintains the live set of worker nodes.
///
/// Cloning yields another handle to the same table. Every operation holds the
/// lock for its whole duration, so a selection never observes a half-applied
/// upsert and the reservation done by least-connections is atomic with the
/// choice.
#[derive(Clone)]
pub struct ServiceRegistry {
    entries: Arc<RwLock<Entries>>,
    expiry_window: Duration,
}

impl ServiceRegistry {
    pub fn new(expiry_window: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Entries::default())),
            expiry_window,
        }
    }

    pub fn expiry_window(&self) -> Duration {
        self.expiry_window
    }

    /// Register a node or refresh its metrics, stamping `last_seen = now`
    pub async fn upsert(
        &self,
        node_id: &str,
        address: NodeAddress,
        connection_count: u32,
        resource_usage: f64,
    ) -> Upsert {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.by_id.get_mut(node_id) {
            entry.address = address;
            entry.connection_count = connection_count;
            entry.resource_usage = resource_usage;
            entry.last_seen = now;
            debug!("Updated node {}: connections={} usage={}", node_id, connection_count, resource_usage);
            return Upsert::Updated;
        }

        let sequence = entries.next_sequence;
        entries.next_sequence += 1;
        entries.by_id.insert(
            node_id.to_string(),
            RegistryEntry {
                node_id: node_id.to_string(),
                address,
                connection_count,
                resource_usage,
                last_seen: now,
                sequence,
            },
        );
        debug!("Registered node {}: connections={} usage={}", node_id, connection_count, resource_usage);
        Upsert::Inserted
    }

    /// Remove every entry not heard from within `window` of `now`.
    /// Returns the removed node ids.
    pub async fn evict_stale(&self, now: Instant, window: Duration) -> Vec<String> {
        let mut entries = self.entries.write().await;
        entries.evict(now, window)
    }

    /// Least-connections pick; the chosen entry's count is incremented
    pub async fn select_least_connections(&self) -> Option<RegistryEntry> {
        self.select(LoadBalancingStrategy::LeastConnections).await
    }

    /// Least-usage pick; no entry is modified
    pub async fn select_least_usage(&self) -> Option<RegistryEntry> {
        self.select(LoadBalancingStrategy::LeastUsage).await
    }

    /// Select a node with the given strategy after dropping stale entries
    pub async fn select(&self, strategy: LoadBalancingStrategy) -> Option<RegistryEntry> {
        let mut entries = self.entries.write().await;

        let removed = entries.evict(Instant::now(), self.expiry_window);
        if !removed.is_empty() {
            debug!("Dropped stale nodes before selection: {:?}", removed);
        }

        let node_id = strategy.pick(entries.by_id.values())?.node_id.clone();
        let entry = entries.by_id.get_mut(&node_id)?;
        if strategy.reserves_connection() {
            entry.connection_count = entry.connection_count.saturating_add(1);
        }
        Some(entry.clone())
    }

    /// Get a node by id
    pub async fn get(&self, node_id: &str) -> Option<RegistryEntry> {
        let entries = self.entries.read().await;
        entries.by_id.get(node_id).cloned()
    }

    /// Snapshot of all entries in registration order
    pub async fn entries(&self) -> Vec<RegistryEntry> {
        let entries = self.entries.read().await;
        let mut snapshot: Vec<RegistryEntry> = entries.by_id.values().cloned().collect();
        snapshot.sort_by_key(|e| e.sequence);
        snapshot
    }

    /// Get count of registered nodes
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
