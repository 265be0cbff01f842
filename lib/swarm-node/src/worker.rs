//! Worker node: announces its load, serves client sessions and stores the
//! readings the dispatcher tags for it

use crate::config::WorkerConfig;
use crate::error::{NodeError, Result};
use crate::parser::DroneReading;
use crate::resources::ResourceSampler;
use crate::server::{spawn_accept_loop, spawn_group_loop, Handler};
use crate::service::{Running, Service};
use crate::shutdown::{ShutdownSignal, TaskSet};
use crate::store::StoreClient;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swarm_core::{Message, MessageKind, NodeReport};
use swarm_transport::{Broadcast, GroupTransport, TcpListenerTransport};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-connection accounting
#[derive(Debug, Default)]
pub struct ClientSession {
    /// The connection issued `USER_REQUEST` and is counted as a session
    counted: bool,
}

/// Worker request handling, independent of the sockets it is driven by
pub struct WorkerService {
    node_id: String,
    port: u16,
    connections: AtomicU32,
    sampler: ResourceSampler,
    store: StoreClient,
    broadcaster: Arc<dyn Broadcast>,
    /// Store saves still in flight
    saves: Mutex<TaskSet>,
}

impl WorkerService {
    pub fn new(
        node_id: impl Into<String>,
        port: u16,
        sampler: ResourceSampler,
        store: StoreClient,
        broadcaster: Arc<dyn Broadcast>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            port,
            connections: AtomicU32::new(0),
            sampler,
            store,
            broadcaster,
            saves: Mutex::new(TaskSet::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn connection_count(&self) -> u32 {
        self.connections.load(Ordering::Acquire)
    }

    /// Current load as announced on the group channel
    pub fn report(&self) -> NodeReport {
        NodeReport {
            connection_count: self.connection_count(),
            resource_usage: self.sampler.sample(),
            node_id: self.node_id.clone(),
            port: self.port,
        }
    }

    /// React to one group message. Returns true when a reading tagged for
    /// this node was accepted and its save started.
    pub async fn on_group_message(&self, message: &Message) -> bool {
        match MessageKind::parse(message.kind()) {
            Some(MessageKind::DiscoveryRequest) => {
                self.announce().await;
                false
            }
            Some(MessageKind::DroneRequest) => {
                let Some(record) = self.accept_reading(message) else {
                    return false;
                };
                let store = self.store.clone();
                let save = tokio::spawn(async move {
                    match store.save(&record).await {
                        Ok(()) => debug!("Saved record {}", record),
                        Err(e) => warn!("Failed to save record {} to {}: {}", record, store.addr(), e),
                    }
                });
                let mut saves = self.saves.lock().await;
                saves.reap();
                saves.push("store-save", save);
                true
            }
            _ => false,
        }
    }

    /// Wait up to `grace` for in-flight saves, aborting the rest.
    /// Returns how many were aborted.
    pub async fn flush_saves(&self, grace: Duration) -> usize {
        let saves = std::mem::take(&mut *self.saves.lock().await);
        if saves.is_empty() {
            return 0;
        }
        debug!("Waiting for {} store saves", saves.len());
        saves.join(grace).await
    }

    async fn announce(&self) {
        let report = self.report();
        let reply = Message::new(MessageKind::DiscoveryReply.as_str(), report.encode());
        match self.broadcaster.broadcast(&reply).await {
            Ok(()) => debug!("Announced {}", reply),
            Err(e) => warn!("Failed to answer discovery request: {}", e),
        }
    }

    /// Parse a tagged `DRONE_REQUEST` if it is addressed to this node
    pub fn accept_reading(&self, message: &Message) -> Option<String> {
        let tagged = message.nested();
        if tagged.kind() != self.node_id {
            return None;
        }
        match DroneReading::parse(tagged.payload()) {
            Ok(reading) => Some(reading.to_record()),
            Err(e) => {
                warn!("Dropping reading for {}: {}", self.node_id, e);
                None
            }
        }
    }

    async fn records_reply(&self, kind: MessageKind) -> Message {
        let records = match self.store.fetch(None).await {
            Ok(records) => records.join(" "),
            Err(e) => {
                warn!("Could not fetch records from {}: {}", self.store.addr(), e);
                String::new()
            }
        };
        Message::new(kind.as_str(), records)
    }
}

#[async_trait]
impl Handler for WorkerService {
    type Session = ClientSession;

    async fn handle(&self, session: &mut ClientSession, request: &Message) -> Message {
        match MessageKind::parse(request.kind()) {
            Some(MessageKind::UserRequest) => {
                if !session.counted {
                    session.counted = true;
                    let count = self.connections.fetch_add(1, Ordering::AcqRel) + 1;
                    info!("Client session opened ({} active)", count);
                }
                self.records_reply(MessageKind::ServerResponse).await
            }
            Some(MessageKind::DataRequest) => self.records_reply(MessageKind::GetResponse).await,
            _ => Message::new(
                MessageKind::UnknownType.as_str(),
                format!("unknown message type: {}", request.kind()),
            ),
        }
    }

    async fn close(&self, session: ClientSession) {
        if session.counted {
            let _ = self
                .connections
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
            debug!("Client session closed ({} active)", self.connection_count());
        }
    }
}

/// The worker role
pub struct WorkerNode {
    config: WorkerConfig,
    node_id: String,
    service: Option<Arc<WorkerService>>,
    running: Option<Running>,
}

impl WorkerNode {
    pub fn new(config: WorkerConfig) -> Result<Self> {
        config.validate()?;
        let node_id = config
            .node_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Ok(Self {
            config,
            node_id,
            service: None,
            running: None,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Active client sessions; zero while stopped
    pub fn connection_count(&self) -> u32 {
        self.service.as_ref().map_or(0, |s| s.connection_count())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }
}

#[async_trait]
impl Service for WorkerNode {
    fn name(&self) -> &'static str {
        "worker"
    }

    async fn start(&mut self) -> Result<SocketAddr> {
        if self.running.is_some() {
            return Err(NodeError::AlreadyStarted(self.name()));
        }

        let config = &self.config;
        let listener =
            TcpListenerTransport::bind_with_retry(&config.bind_host, config.port, config.max_bind_attempts)
                .await?;
        let local_addr = listener.local_addr();
        let group = GroupTransport::join(&config.group).await?;

        let sampler = match config.resource_usage {
            Some(usage) => ResourceSampler::fixed(usage),
            None => ResourceSampler::system(),
        };
        let service = Arc::new(WorkerService::new(
            self.node_id.clone(),
            local_addr.port(),
            sampler,
            StoreClient::new(config.store.clone(), config.store_timeout),
            Arc::new(group.sender()),
        ));

        let shutdown = ShutdownSignal::new();
        let mut tasks = TaskSet::new();
        tasks.push(
            "accept",
            spawn_accept_loop(listener, Arc::clone(&service), shutdown.clone()),
        );

        let drain = Arc::clone(&service);
        tasks.push(
            "group-drain",
            spawn_group_loop("group-drain", group, shutdown.subscribe(), move |_sender, message| {
                let service = Arc::clone(&drain);
                async move {
                    service.on_group_message(&message).await;
                }
            }),
        );

        info!(
            "Worker {} started on {}, storing to {}",
            self.node_id, local_addr, config.store
        );
        self.service = Some(service);
        self.running = Some(Running {
            shutdown,
            tasks,
            local_addr,
        });
        Ok(local_addr)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(running) = self.running.take() {
            running.stop(self.name(), self.config.shutdown_grace).await;
        }
        if let Some(service) = self.service.take() {
            let lost = service.flush_saves(self.config.shutdown_grace).await;
            if lost > 0 {
                warn!("Dropped {} unsaved records on shutdown", lost);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::DataStore;
    use std::sync::Mutex;
    use std::time::Duration;
    use swarm_core::NodeAddress;
    use swarm_transport::{TcpTransport, Transport};

    #[derive(Default)]
    struct RecordingBroadcast {
        sent: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl Broadcast for RecordingBroadcast {
        async fn broadcast(&self, message: &Message) -> swarm_transport::Result<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    async fn start_store() -> (DataStore, NodeAddress) {
        let mut store = DataStore::new(StoreConfig {
            bind_host: "127.0.0.1".to_string(),
            port: 0,
            ..StoreConfig::default()
        })
        .unwrap();
        let addr = store.start().await.unwrap();
        (store, NodeAddress::new("127.0.0.1", addr.port()))
    }

    fn worker(store: NodeAddress, broadcaster: Arc<RecordingBroadcast>) -> WorkerService {
        WorkerService::new(
            "w1",
            9001,
            ResourceSampler::fixed(12.5),
            StoreClient::new(store, Duration::from_secs(2)),
            broadcaster,
        )
    }

    #[tokio::test]
    async fn test_discovery_request_answered_with_report() {
        let broadcaster = Arc::new(RecordingBroadcast::default());
        let worker = worker(NodeAddress::new("127.0.0.1", 1), Arc::clone(&broadcaster));

        // the older solicitation name is answered too
        for kind in ["DISCOVERY_REQUEST", "DATACENTER_REQUEST"] {
            assert!(!worker.on_group_message(&Message::new(kind, "who is there")).await);
        }

        let sent = broadcaster.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], Message::new("DISCOVERY_REPLY", "0;12.5;w1;9001"));
    }

    #[tokio::test]
    async fn test_own_replies_and_foreign_readings_ignored() {
        let broadcaster = Arc::new(RecordingBroadcast::default());
        let worker = worker(NodeAddress::new("127.0.0.1", 1), Arc::clone(&broadcaster));

        assert!(!worker.on_group_message(&Message::new("DISCOVERY_REPLY", "0;12.5;w1;9001")).await);
        assert!(!worker.on_group_message(&Message::new("DRONE_REQUEST", "w2|23.5,60,1013#4.2")).await);
        assert!(!worker.on_group_message(&Message::new("DRONE_REQUEST", "w1|no numbers here")).await);
        assert!(broadcaster.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tagged_reading_reaches_store() {
        let (mut store, store_addr) = start_store().await;
        let worker = worker(store_addr, Arc::default());

        assert!(
            worker
                .on_group_message(&Message::new("DRONE_REQUEST", "w1|23.5,60,1013#4.2"))
                .await
        );
        assert_eq!(worker.flush_saves(Duration::from_secs(5)).await, 0);

        let records: Vec<String> = store.records().latest(None).into_iter().map(|r| r.record).collect();
        assert_eq!(records, vec!["[1013|4.2|23.5|60]"]);
        store.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stalled_saves_aborted_after_grace() {
        // accepts the connection but never answers
        let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let silent_addr = NodeAddress::new("127.0.0.1", silent.local_addr().unwrap().port());
        let worker = WorkerService::new(
            "w1",
            9001,
            ResourceSampler::fixed(12.5),
            StoreClient::new(silent_addr, Duration::from_secs(30)),
            Arc::new(RecordingBroadcast::default()),
        );

        for raw in ["w1|1,2,3,4", "w1|5,6,7,8"] {
            assert!(worker.on_group_message(&Message::new("DRONE_REQUEST", raw)).await);
        }
        assert_eq!(worker.flush_saves(Duration::from_millis(200)).await, 2);
        assert_eq!(worker.flush_saves(Duration::from_millis(200)).await, 0);
        drop(silent);
    }

    #[tokio::test]
    async fn test_sessions_counted_until_close() {
        let (mut store, store_addr) = start_store().await;
        store.records().push("[1|2|3|4]");
        store.records().push("[5|6|7|8]");

        let service = Arc::new(worker(store_addr, Arc::default()));
        let listener = TcpListenerTransport::bind("127.0.0.1", 0).await.unwrap();
        let addr = NodeAddress::new("127.0.0.1", listener.local_addr().port());
        let shutdown = ShutdownSignal::new();
        let accept = spawn_accept_loop(listener, Arc::clone(&service), shutdown.clone());

        let mut first = TcpTransport::connect(&addr).await.unwrap();
        let reply = first.request(&Message::new("USER_REQUEST", "")).await.unwrap();
        assert_eq!(reply, Message::new("SERVER_RESPONSE", "[1|2|3|4] [5|6|7|8]"));
        first.request(&Message::new("USER_REQUEST", "")).await.unwrap();
        assert_eq!(service.connection_count(), 1);

        let mut second = TcpTransport::connect(&addr).await.unwrap();
        let reply = second.request(&Message::new("DATA_REQUEST", "")).await.unwrap();
        assert_eq!(reply.kind(), "GET_RESPONSE");
        assert_eq!(service.connection_count(), 1);
        second.request(&Message::new("USER_REQUEST", "")).await.unwrap();
        assert_eq!(service.connection_count(), 2);

        first.close().await.unwrap();
        second.close().await.unwrap();
        shutdown.trigger();
        accept.await.unwrap();
        assert_eq!(service.connection_count(), 0);

        store.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_store_gives_empty_listing() {
        let listener = TcpListenerTransport::bind("127.0.0.1", 0).await.unwrap();
        let unused = NodeAddress::new("127.0.0.1", listener.local_addr().port());
        drop(listener);

        let worker = worker(unused, Arc::default());
        let reply = worker
            .handle(&mut ClientSession::default(), &Message::new("USER_REQUEST", ""))
            .await;
        assert_eq!(reply, Message::new("SERVER_RESPONSE", ""));
        assert_eq!(worker.connection_count(), 1);
    }

    #[test]
    fn test_generated_node_id() {
        let node = WorkerNode::new(WorkerConfig::default()).unwrap();
        assert!(Uuid::parse_str(node.node_id()).is_ok());
        assert_eq!(node.connection_count(), 0);

        let node = WorkerNode::new(WorkerConfig {
            node_id: Some("w7".to_string()),
            ..WorkerConfig::default()
        })
        .unwrap();
        assert_eq!(node.node_id(), "w7");
    }
}
