//! Transports for the swarm protocol
//!
//! Two implementations share the [`Transport`] capability set:
//! - [`TcpTransport`]: reliable, ordered, newline-delimited, point to point.
//!   [`TcpListenerTransport`] accepts peers and yields one transport each.
//! - [`GroupTransport`]: best-effort UDP multicast. Every member, including
//!   the sender, receives each datagram.

pub mod error;
pub mod group;
pub mod tcp;

pub use error::{Result, TransportError};
pub use group::{Datagram, GroupConfig, GroupSender, GroupTransport, MAX_DATAGRAM_SIZE};
pub use tcp::{TcpListenerTransport, TcpTransport};

use async_trait::async_trait;
use swarm_core::Message;

/// Send, receive and close messages over some channel
#[async_trait]
pub trait Transport: Send {
    /// Send one message
    async fn send(&mut self, message: &Message) -> Result<()>;

    /// Wait for the next message
    async fn receive(&mut self) -> Result<Message>;

    /// Close the transport. Closing twice is not an error.
    async fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Publish a message to every member of a group.
///
/// Split from [`Transport`] so the sending side of a group channel can be
/// handed to tasks that do not own the receiving side.
#[async_trait]
pub trait Broadcast: Send + Sync {
    async fn broadcast(&self, message: &Message) -> Result<()>;
}
