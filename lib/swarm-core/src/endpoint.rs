//! Node addresses
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Host and port a worker (or the dispatcher, or the store) listens on
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = ProtocolError;

    /// Parse `host:port`; the port is taken after the last colon
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| ProtocolError::MalformedAddress(s.to_string()))?;

        if host.is_empty() {
            return Err(ProtocolError::MalformedAddress(s.to_string()));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| ProtocolError::MalformedAddress(s.to_string()))?;

        Ok(Self::new(host, port))
    }
}
