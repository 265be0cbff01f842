//! Role configuration
//!
//! Every role has a plain config struct with production defaults. Configs can
//! be read from YAML; durations are written as (fractional) seconds.

use crate::error::{NodeError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use swarm_core::NodeAddress;
use swarm_transport::GroupConfig;

/// Dispatcher settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub bind_host: String,
    /// First port tried for the client listener
    pub port: u16,
    /// Ports tried (port, port + 1, ...) while the address is in use
    pub max_bind_attempts: u32,
    pub group: GroupConfig,
    /// Delay before the first discovery solicitation
    #[serde(with = "seconds")]
    pub heartbeat_initial_delay: Duration,
    #[serde(with = "seconds")]
    pub heartbeat_interval: Duration,
    #[serde(with = "seconds")]
    pub sweep_interval: Duration,
    /// Nodes silent for longer than this are evicted
    #[serde(with = "seconds")]
    pub expiry_window: Duration,
    /// How long `stop` waits for tasks before aborting them
    #[serde(with = "seconds")]
    pub shutdown_grace: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8080,
            max_bind_attempts: 16,
            group: GroupConfig::default(),
            heartbeat_initial_delay: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(30),
            expiry_window: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<()> {
        require_attempts(self.max_bind_attempts)?;
        require_nonzero("heartbeat_interval", self.heartbeat_interval)?;
        require_nonzero("sweep_interval", self.sweep_interval)?;
        require_nonzero("expiry_window", self.expiry_window)?;
        Ok(())
    }
}

/// Worker node settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Stable node id; a random UUID is generated when unset
    pub node_id: Option<String>,
    pub bind_host: String,
    pub port: u16,
    pub max_bind_attempts: u32,
    pub group: GroupConfig,
    /// Backing store that receives parsed records
    pub store: NodeAddress,
    #[serde(with = "seconds")]
    pub store_timeout: Duration,
    /// Report this usage instead of sampling CPU and memory
    pub resource_usage: Option<f64>,
    #[serde(with = "seconds")]
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            bind_host: "0.0.0.0".to_string(),
            port: 8081,
            max_bind_attempts: 16,
            group: GroupConfig::default(),
            store: NodeAddress::new("127.0.0.1", 7000),
            store_timeout: Duration::from_secs(2),
            resource_usage: None,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        require_attempts(self.max_bind_attempts)?;
        if let Some(id) = &self.node_id {
            if id.is_empty() || id.contains(['|', ';']) {
                return Err(NodeError::InvalidConfiguration(format!(
                    "node_id must be non-empty and free of '|' and ';': {:?}",
                    id
                )));
            }
        }
        if let Some(usage) = self.resource_usage {
            if !(0.0..=100.0).contains(&usage) {
                return Err(NodeError::InvalidConfiguration(format!(
                    "resource_usage {} outside [0, 100]",
                    usage
                )));
            }
        }
        Ok(())
    }
}

/// Data store settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub bind_host: String,
    pub port: u16,
    pub max_bind_attempts: u32,
    /// Records kept before the oldest are dropped
    pub capacity: usize,
    #[serde(with = "seconds")]
    pub shutdown_grace: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 7000,
            max_bind_attempts: 16,
            capacity: 1000,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        require_attempts(self.max_bind_attempts)?;
        if self.capacity == 0 {
            return Err(NodeError::InvalidConfiguration(
                "capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load a config from a YAML file
pub fn load_yaml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| NodeError::ConfigFile {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_yaml::from_str(&text)?)
}

fn require_attempts(attempts: u32) -> Result<()> {
    if attempts == 0 {
        return Err(NodeError::InvalidConfiguration(
            "max_bind_attempts must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn require_nonzero(name: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(NodeError::InvalidConfiguration(format!("{} must be non-zero", name)));
    }
    Ok(())
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.heartbeat_initial_delay, Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.expiry_window, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "port: 9100\nexpiry_window: 90\nheartbeat_interval: 2.5\ngroup:\n  port: 40000\n";
        let config: DispatcherConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.expiry_window, Duration::from_secs(90));
        assert_eq!(config.heartbeat_interval, Duration::from_millis(2500));
        assert_eq!(config.group.port, 40000);
        assert_eq!(config.group.group, GroupConfig::default().group);
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_worker_yaml() {
        let yaml = "node_id: w1\nport: 9001\nstore:\n  host: store.local\n  port: 7100\nresource_usage: 12.5\n";
        let config: WorkerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.node_id.as_deref(), Some("w1"));
        assert_eq!(config.store, NodeAddress::new("store.local", 7100));
        assert_eq!(config.resource_usage, Some(12.5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let config = DispatcherConfig {
            sweep_interval: Duration::ZERO,
            ..DispatcherConfig::default()
        };
        assert!(config.validate().is_err());

        let config = WorkerConfig {
            node_id: Some("bad|id".to_string()),
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = WorkerConfig {
            resource_usage: Some(120.0),
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = StoreConfig {
            capacity: 0,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_duration_rejected() {
        let result: std::result::Result<DispatcherConfig, _> = serde_yaml::from_str("sweep_interval: -1");
        assert!(result.is_err());
    }
}
