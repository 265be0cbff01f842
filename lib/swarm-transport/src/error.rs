use swarm_core::EncodingError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Transport is closed")]
    Closed,

    #[error("Failed to join multicast group {group}: {source}")]
    Join {
        group: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// True when the address was already taken, the one bind failure worth
    /// retrying on another port
    pub fn is_address_in_use(&self) -> bool {
        matches!(
            self,
            TransportError::Bind { source, .. } if source.kind() == std::io::ErrorKind::AddrInUse
        )
    }

    /// True when the other side or this side has closed the transport
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::ConnectionClosed | TransportError::Closed)
    }
}
