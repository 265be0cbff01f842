use swarm_core::ProtocolError;
use swarm_transport::TransportError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodeError>;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("{0} is already running")]
    AlreadyStarted(&'static str),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Failed to read configuration file {path}: {source}")]
    ConfigFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("Timed out talking to {0}")]
    Timeout(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Failed to initialise logging: {0}")]
    Telemetry(String),
}
