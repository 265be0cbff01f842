//! Client-side helpers for talking to the dispatcher and to workers

use crate::dispatcher::NO_SERVERS_AVAILABLE;
use crate::error::{NodeError, Result};
use crate::store::{expect_kind, split_records};
use swarm_core::{Message, MessageKind, NodeAddress, ProtocolError};
use swarm_transport::{TcpTransport, Transport};

/// Outcome of asking the dispatcher for a worker
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Assignment {
    Node(NodeAddress),
    /// No worker is registered right now
    NoCapacity,
}

/// A connection to the dispatcher
pub struct DispatcherClient {
    transport: TcpTransport,
}

impl DispatcherClient {
    pub async fn connect(addr: &NodeAddress) -> Result<Self> {
        Ok(Self {
            transport: TcpTransport::connect(addr).await?,
        })
    }

    /// Ask for the worker with the fewest connections
    pub async fn request_node(&mut self) -> Result<Assignment> {
        let reply = self
            .transport
            .request(&Message::new(MessageKind::UserRequest.as_str(), ""))
            .await?;
        let reply = accepted(reply)?;
        if reply.payload() == NO_SERVERS_AVAILABLE {
            return Ok(Assignment::NoCapacity);
        }
        Ok(Assignment::Node(reply.payload().parse()?))
    }

    /// Submit a raw sensor reading; returns the dispatcher's acknowledgement
    pub async fn submit_reading(&mut self, raw: &str) -> Result<String> {
        let reply = self
            .transport
            .request(&Message::new(MessageKind::DroneRequest.as_str(), raw))
            .await?;
        Ok(accepted(reply)?.payload().to_string())
    }

    pub async fn close(&mut self) -> Result<()> {
        Ok(self.transport.close().await?)
    }
}

/// Map dispatcher replies: errors become [`NodeError::Rejected`]
fn accepted(reply: Message) -> Result<Message> {
    match MessageKind::parse(reply.kind()) {
        Some(MessageKind::DatacenterResponse) => Ok(reply),
        Some(MessageKind::DatacenterError) | Some(MessageKind::UnknownType) => {
            Err(NodeError::Rejected(reply.payload().to_string()))
        }
        _ => Err(ProtocolError::UnexpectedReply {
            expected: MessageKind::DatacenterResponse.to_string(),
            got: reply.to_string(),
        }
        .into()),
    }
}

/// A session with a worker, opened with `USER_REQUEST`
pub struct WorkerSession {
    transport: TcpTransport,
    records: Vec<String>,
}

impl WorkerSession {
    pub async fn open(addr: &NodeAddress) -> Result<Self> {
        let mut transport = TcpTransport::connect(addr).await?;
        let reply = transport
            .request(&Message::new(MessageKind::UserRequest.as_str(), ""))
            .await?;
        expect_kind(&reply, MessageKind::ServerResponse)?;
        Ok(Self {
            transport,
            records: split_records(reply.payload()),
        })
    }

    /// Records the worker sent when the session was opened
    pub fn records(&self) -> &[String] {
        &self.records
    }

    /// Ask the worker for the current records
    pub async fn fetch_records(&mut self) -> Result<Vec<String>> {
        let reply = self
            .transport
            .request(&Message::new(MessageKind::DataRequest.as_str(), ""))
            .await?;
        expect_kind(&reply, MessageKind::GetResponse)?;
        self.records = split_records(reply.payload());
        Ok(self.records.clone())
    }

    /// End the session; the worker releases its connection slot
    pub async fn close(&mut self) -> Result<()> {
        Ok(self.transport.close().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatchService;
    use crate::metrics::DispatchMetrics;
    use crate::server::spawn_accept_loop;
    use crate::shutdown::ShutdownSignal;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use swarm_core::ServiceRegistry;
    use swarm_transport::{Broadcast, TcpListenerTransport, TransportError};

    struct ClosedGroup;

    #[async_trait]
    impl Broadcast for ClosedGroup {
        async fn broadcast(&self, _message: &Message) -> swarm_transport::Result<()> {
            Err(TransportError::Closed)
        }
    }

    #[test]
    fn test_reply_mapping() {
        let ok = Message::new("DATACENTER_RESPONSE", "10.0.0.1:9001");
        assert_eq!(accepted(ok.clone()).unwrap(), ok);
        assert!(matches!(
            accepted(Message::new("DATACENTER_ERROR", "no servers available")),
            Err(NodeError::Rejected(_))
        ));
        assert!(matches!(
            accepted(Message::new("GET_RESPONSE", "")),
            Err(NodeError::Protocol(ProtocolError::UnexpectedReply { .. }))
        ));
    }

    #[tokio::test]
    async fn test_dispatcher_client_round_trip() {
        let service = Arc::new(DispatchService::new(
            ServiceRegistry::new(Duration::from_secs(60)),
            Arc::new(ClosedGroup),
            DispatchMetrics::new().unwrap(),
        ));
        let listener = TcpListenerTransport::bind("127.0.0.1", 0).await.unwrap();
        let addr = NodeAddress::new("127.0.0.1", listener.local_addr().port());
        let shutdown = ShutdownSignal::new();
        let accept = spawn_accept_loop(listener, Arc::clone(&service), shutdown.clone());

        let mut client = DispatcherClient::connect(&addr).await.unwrap();
        assert_eq!(client.request_node().await.unwrap(), Assignment::NoCapacity);

        service
            .registry()
            .upsert("w1", NodeAddress::new("10.0.0.1", 9001), 0, 5.0)
            .await;
        assert_eq!(
            client.request_node().await.unwrap(),
            Assignment::Node(NodeAddress::new("10.0.0.1", 9001))
        );

        // the group is down, so the reading is refused
        assert!(matches!(
            client.submit_reading("1,2,3,4").await,
            Err(NodeError::Rejected(_))
        ));

        client.close().await.unwrap();
        shutdown.trigger();
        accept.await.unwrap();
    }
}
