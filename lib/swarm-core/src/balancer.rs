//! Selection strategies over live registry entries

use crate::registry::RegistryEntry;

/// Load balancing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancingStrategy {
    /// Fewest connections; the winner's count is bumped to reserve a slot.
    /// Used for client session assignment.
    LeastConnections,
    /// Lowest resource usage, no side effect.
    /// Used for fire-and-forget forwarding of sensor readings.
    LeastUsage,
}

impl LoadBalancingStrategy {
    /// Whether selecting under this strategy reserves a connection slot
    pub fn reserves_connection(&self) -> bool {
        matches!(self, LoadBalancingStrategy::LeastConnections)
    }

    /// Pick the best candidate. Ties go to the entry registered first.
    pub fn pick<'a, I>(&self, candidates: I) -> Option<&'a RegistryEntry>
    where
        I: IntoIterator<Item = &'a RegistryEntry>,
    {
        match self {
            LoadBalancingStrategy::LeastConnections => candidates
                .into_iter()
                .min_by_key(|e| (e.connection_count, e.sequence)),
            LoadBalancingStrategy::LeastUsage => candidates.into_iter().min_by(|a, b| {
                a.resource_usage
                    .total_cmp(&b.resource_usage)
                    .then(a.sequence.cmp(&b.sequence))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeAddress;
    use tokio::time::Instant;

    fn entry(id: &str, sequence: u64, connections: u32, usage: f64) -> RegistryEntry {
        RegistryEntry {
            node_id: id.to_string(),
            address: NodeAddress::new("127.0.0.1", 9000 + sequence as u16),
            connection_count: connections,
            resource_usage: usage,
            last_seen: Instant::now(),
            sequence,
        }
    }

    #[tokio::test]
    async fn test_least_connections_prefers_earliest_on_tie() {
        let entries = vec![
            entry("a", 0, 3, 10.0),
            entry("b", 1, 1, 50.0),
            entry("c", 2, 1, 5.0),
            entry("d", 3, 5, 1.0),
        ];
        let picked = LoadBalancingStrategy::LeastConnections.pick(&entries).unwrap();
        assert_eq!(picked.node_id, "b");
    }

    #[tokio::test]
    async fn test_least_usage() {
        let entries = vec![
            entry("a", 0, 0, 40.0),
            entry("b", 1, 9, 12.5),
            entry("c", 2, 0, 12.5),
        ];
        let picked = LoadBalancingStrategy::LeastUsage.pick(&entries).unwrap();
        assert_eq!(picked.node_id, "b");
    }

    #[test]
    fn test_empty_candidates() {
        let entries: Vec<RegistryEntry> = Vec::new();
        assert!(LoadBalancingStrategy::LeastConnections.pick(&entries).is_none());
        assert!(LoadBalancingStrategy::LeastUsage.pick(&entries).is_none());
    }

    #[test]
    fn test_reservation_flag() {
        assert!(LoadBalancingStrategy::LeastConnections.reserves_connection());
        assert!(!LoadBalancingStrategy::LeastUsage.reserves_connection());
    }
}
