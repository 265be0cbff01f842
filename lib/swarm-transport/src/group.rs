//! Best-effort group transport over UDP multicast

use crate::error::{Result, TransportError};
use crate::{Broadcast, Transport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use swarm_core::Message;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Receive buffer size; longer datagrams are cut to this length on receipt
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Multicast group membership settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Multicast group address
    pub group: Ipv4Addr,
    /// UDP port shared by every member
    pub port: u16,
    /// Local interface to join on; unspecified lets the OS choose
    pub interface: Ipv4Addr,
    /// Deliver our own datagrams back to us
    pub loopback: bool,
    pub ttl: u32,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            group: Ipv4Addr::new(224, 6, 7, 8),
            port: 12345,
            interface: Ipv4Addr::UNSPECIFIED,
            loopback: true,
            ttl: 1,
        }
    }
}

impl GroupConfig {
    fn group_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.group, self.port)
    }
}

/// Outcome of waiting for a datagram
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Datagram {
    /// A datagram arrived from `sender`
    Received { sender: SocketAddr, raw: String },
    /// Nothing usable was received (I/O failure or closed transport); try again
    Empty,
}

impl Datagram {
    /// The message carried by the datagram
    pub fn message(&self) -> Option<Message> {
        match self {
            Datagram::Received { raw, .. } => Some(Message::decode(raw)),
            Datagram::Empty => None,
        }
    }

    /// Wrap as a message whose kind is the sender address and whose payload is the raw datagram
    pub fn into_envelope(self) -> Message {
        match self {
            Datagram::Received { sender, raw } => Message::new(sender.to_string(), raw),
            Datagram::Empty => Message::empty(),
        }
    }

    /// Inverse of [`Datagram::into_envelope`]. An envelope whose kind is not
    /// a socket address is treated as empty.
    pub fn from_envelope(envelope: &Message) -> Self {
        match envelope.kind().parse::<SocketAddr>() {
            Ok(sender) => Datagram::Received {
                sender,
                raw: envelope.payload().to_string(),
            },
            Err(_) => Datagram::Empty,
        }
    }
}

struct Membership {
    socket: UdpSocket,
    group: SocketAddrV4,
    interface: Ipv4Addr,
    closed: AtomicBool,
}

impl Membership {
    async fn send(&self, message: &Message) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let encoded = message.encode()?;
        self.socket.send_to(encoded.as_bytes(), self.group).await?;
        debug!("Broadcast to {}: {}", self.group, encoded);
        Ok(())
    }
}

/// Member of a multicast group.
///
/// The transport itself is the receiving side and is meant to be owned by a
/// single loop; [`GroupTransport::sender`] hands out clone-able sending
/// handles for other tasks.
pub struct GroupTransport {
    membership: Arc<Membership>,
}

impl GroupTransport {
    /// Bind the group port and join the group
    pub async fn join(config: &GroupConfig) -> Result<Self> {
        let join_error = |source: std::io::Error| TransportError::Join {
            group: config.group_addr().to_string(),
            source,
        };

        if !config.group.is_multicast() {
            return Err(join_error(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a multicast address",
            )));
        }

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(join_error)?;
        socket.set_reuse_address(true).map_err(join_error)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true).map_err(join_error)?;

        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
        socket
            .bind(&bind_addr.into())
            .map_err(|source| TransportError::Bind {
                addr: bind_addr.to_string(),
                source,
            })?;
        socket
            .join_multicast_v4(&config.group, &config.interface)
            .map_err(join_error)?;
        socket.set_multicast_loop_v4(config.loopback).map_err(join_error)?;
        socket.set_multicast_ttl_v4(config.ttl).map_err(join_error)?;
        socket.set_nonblocking(true).map_err(join_error)?;

        let socket = UdpSocket::from_std(socket.into())?;
        debug!("Joined multicast group {}", config.group_addr());

        Ok(Self {
            membership: Arc::new(Membership {
                socket,
                group: config.group_addr(),
                interface: config.interface,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// A handle that broadcasts on this membership
    pub fn sender(&self) -> GroupSender {
        GroupSender {
            membership: Arc::clone(&self.membership),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.membership.socket.local_addr()?)
    }

    /// Wait for the next datagram from any member, ourselves included.
    /// Failures come back as [`Datagram::Empty`] rather than an error.
    pub async fn recv_datagram(&self) -> Datagram {
        if self.is_closed() {
            return Datagram::Empty;
        }

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        match self.membership.socket.recv_from(&mut buf).await {
            Ok((len, sender)) => Datagram::Received {
                sender,
                raw: String::from_utf8_lossy(&buf[..len]).into_owned(),
            },
            Err(e) => {
                warn!("Multicast receive failed: {}", e);
                Datagram::Empty
            }
        }
    }

    /// Leave the group; senders handed out earlier start failing with
    /// [`TransportError::Closed`]
    pub fn leave(&self) {
        let membership = &self.membership;
        if membership.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = membership
            .socket
            .leave_multicast_v4(*membership.group.ip(), membership.interface)
        {
            warn!("Failed to leave multicast group {}: {}", membership.group, e);
        }
        debug!("Left multicast group {}", membership.group);
    }

    pub fn is_closed(&self) -> bool {
        self.membership.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for GroupTransport {
    async fn send(&mut self, message: &Message) -> Result<()> {
        self.membership.send(message).await
    }

    /// Returns the sender envelope, or the empty message on I/O failure
    async fn receive(&mut self) -> Result<Message> {
        if GroupTransport::is_closed(self) {
            return Err(TransportError::Closed);
        }
        Ok(self.recv_datagram().await.into_envelope())
    }

    async fn close(&mut self) -> Result<()> {
        self.leave();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        GroupTransport::is_closed(self)
    }
}

/// Sending half of a [`GroupTransport`]
#[derive(Clone)]
pub struct GroupSender {
    membership: Arc<Membership>,
}

impl GroupSender {
    pub fn group(&self) -> SocketAddrV4 {
        self.membership.group
    }
}

#[async_trait]
impl Broadcast for GroupSender {
    async fn broadcast(&self, message: &Message) -> Result<()> {
        self.membership.send(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GroupConfig::default();
        assert_eq!(config.group, Ipv4Addr::new(224, 6, 7, 8));
        assert_eq!(config.port, 12345);
        assert!(config.loopback);
    }

    #[test]
    fn test_envelope_round_trip() {
        let sender: SocketAddr = "192.168.1.20:12345".parse().unwrap();
        let datagram = Datagram::Received {
            sender,
            raw: "DISCOVERY_REPLY|0;12.5;w1;9001".to_string(),
        };

        let envelope = datagram.clone().into_envelope();
        assert_eq!(envelope.kind(), "192.168.1.20:12345");
        assert_eq!(envelope.payload(), "DISCOVERY_REPLY|0;12.5;w1;9001");
        assert_eq!(envelope.nested(), Message::new("DISCOVERY_REPLY", "0;12.5;w1;9001"));

        assert_eq!(Datagram::from_envelope(&envelope), datagram);
    }

    #[test]
    fn test_empty_datagram() {
        assert!(Datagram::Empty.into_envelope().is_empty());
        assert_eq!(Datagram::from_envelope(&Message::empty()), Datagram::Empty);
        assert_eq!(Datagram::Empty.message(), None);
    }

    #[tokio::test]
    async fn test_join_rejects_unicast_group() {
        let config = GroupConfig {
            group: Ipv4Addr::new(10, 0, 0, 1),
            ..GroupConfig::default()
        };
        let err = GroupTransport::join(&config).await.err().unwrap();
        assert!(matches!(err, TransportError::Join { .. }));
    }

    #[tokio::test]
    #[ignore = "needs a multicast-capable network interface"]
    async fn test_member_receives_own_broadcast() {
        let config = GroupConfig {
            group: Ipv4Addr::new(239, 255, 42, 99),
            port: 47231,
            ..GroupConfig::default()
        };
        let mut transport = GroupTransport::join(&config).await.unwrap();
        let sender = transport.sender();

        sender
            .broadcast(&Message::new("DISCOVERY_REQUEST", "hello"))
            .await
            .unwrap();

        let envelope = transport.receive().await.unwrap();
        assert!(envelope.kind().parse::<SocketAddr>().is_ok());
        assert_eq!(envelope.nested(), Message::new("DISCOVERY_REQUEST", "hello"));

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(matches!(
            sender.broadcast(&Message::new("X", "")).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    #[ignore = "needs a multicast-capable network interface"]
    async fn test_oversized_datagram_is_truncated() {
        let config = GroupConfig {
            group: Ipv4Addr::new(239, 255, 42, 98),
            port: 47232,
            ..GroupConfig::default()
        };
        let transport = GroupTransport::join(&config).await.unwrap();
        let payload = "x".repeat(3 * MAX_DATAGRAM_SIZE);
        transport
            .sender()
            .broadcast(&Message::new("DRONE_REQUEST", payload))
            .await
            .unwrap();

        match transport.recv_datagram().await {
            Datagram::Received { raw, .. } => assert_eq!(raw.len(), MAX_DATAGRAM_SIZE),
            Datagram::Empty => panic!("expected a datagram"),
        }
    }
}
