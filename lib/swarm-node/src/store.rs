//! Backing data store for parsed sensor records

use crate::config::StoreConfig;
use crate::error::{NodeError, Result};
use crate::server::{spawn_accept_loop, Handler};
use crate::service::{Running, Service};
use crate::shutdown::{ShutdownSignal, TaskSet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use swarm_core::{Message, MessageKind, NodeAddress, ProtocolError};
use swarm_transport::{TcpListenerTransport, TcpTransport, Transport};
use tracing::{debug, info, warn};

/// Reply payload for an accepted record
pub const SAVE_OK: &str = "ok";

/// One record as kept by the store
#[derive(Clone, Debug, PartialEq)]
pub struct StoredRecord {
    pub record: String,
    pub received_at: DateTime<Utc>,
}

/// Bounded in-memory record log; the oldest records go first when full
#[derive(Clone)]
pub struct RecordStore {
    records: Arc<Mutex<VecDeque<StoredRecord>>>,
    capacity: usize,
}

impl RecordStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<StoredRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, record: impl Into<String>) {
        let mut records = self.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(StoredRecord {
            record: record.into(),
            received_at: Utc::now(),
        });
    }

    /// The newest `limit` records (all when `None`), oldest first
    pub fn latest(&self, limit: Option<usize>) -> Vec<StoredRecord> {
        let records = self.lock();
        let skip = limit.map_or(0, |limit| records.len().saturating_sub(limit));
        records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl Handler for RecordStore {
    type Session = ();

    async fn handle(&self, _session: &mut (), request: &Message) -> Message {
        match MessageKind::parse(request.kind()) {
            Some(MessageKind::SaveData) => {
                let record = request.payload();
                if record.is_empty() || record.contains(char::is_whitespace) {
                    warn!("Rejected record {:?}", record);
                    return Message::new(
                        MessageKind::SaveResponse.as_str(),
                        "error: records must be non-empty and free of whitespace",
                    );
                }
                self.push(record);
                debug!("Stored record {}", record);
                Message::new(MessageKind::SaveResponse.as_str(), SAVE_OK)
            }
            Some(MessageKind::GetData) => {
                let limit = match request.payload().trim() {
                    "" => None,
                    raw => match raw.parse::<usize>() {
                        Ok(limit) => Some(limit),
                        Err(_) => {
                            warn!("Ignoring invalid record limit {:?}", raw);
                            None
                        }
                    },
                };
                let listing: Vec<String> = self.latest(limit).into_iter().map(|r| r.record).collect();
                Message::new(MessageKind::GetResponse.as_str(), listing.join(" "))
            }
            _ => Message::new(
                MessageKind::UnknownType.as_str(),
                format!("unknown message type: {}", request.kind()),
            ),
        }
    }
}

/// The data store role
pub struct DataStore {
    config: StoreConfig,
    records: RecordStore,
    running: Option<Running>,
}

impl DataStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            records: RecordStore::new(config.capacity),
            config,
            running: None,
        })
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }
}

#[async_trait]
impl Service for DataStore {
    fn name(&self) -> &'static str {
        "data store"
    }

    async fn start(&mut self) -> Result<SocketAddr> {
        if self.running.is_some() {
            return Err(NodeError::AlreadyStarted(self.name()));
        }

        let listener = TcpListenerTransport::bind_with_retry(
            &self.config.bind_host,
            self.config.port,
            self.config.max_bind_attempts,
        )
        .await?;
        let local_addr = listener.local_addr();

        let shutdown = ShutdownSignal::new();
        let mut tasks = TaskSet::new();
        tasks.push(
            "accept",
            spawn_accept_loop(listener, Arc::new(self.records.clone()), shutdown.clone()),
        );

        info!("Data store started on {} (capacity {})", local_addr, self.config.capacity);
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
        Ok(())
    }
}

/// Client for the data store. Each call uses a fresh connection.
#[derive(Clone, Debug)]
pub struct StoreClient {
    addr: NodeAddress,
    timeout: Duration,
}

impl StoreClient {
    pub fn new(addr: NodeAddress, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    pub fn addr(&self) -> &NodeAddress {
        &self.addr
    }

    /// Store one record
    pub async fn save(&self, record: &str) -> Result<()> {
        let reply = self
            .exchange(Message::new(MessageKind::SaveData.as_str(), record))
            .await?;
        expect_kind(&reply, MessageKind::SaveResponse)?;
        if reply.payload() != SAVE_OK {
            return Err(NodeError::Rejected(reply.payload().to_string()));
        }
        Ok(())
    }

    /// Fetch the newest `limit` records, or all of them
    pub async fn fetch(&self, limit: Option<usize>) -> Result<Vec<String>> {
        let payload = limit.map(|l| l.to_string()).unwrap_or_default();
        let reply = self
            .exchange(Message::new(MessageKind::GetData.as_str(), payload))
            .await?;
        expect_kind(&reply, MessageKind::GetResponse)?;
        Ok(split_records(reply.payload()))
    }

    async fn exchange(&self, request: Message) -> Result<Message> {
        let call = async {
            let mut transport = TcpTransport::connect(&self.addr).await?;
            let reply = transport.request(&request).await?;
            transport.close().await?;
            Ok::<_, NodeError>(reply)
        };
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(NodeError::Timeout(self.addr.to_string())),
        }
    }
}

/// Split a space-separated record listing
pub(crate) fn split_records(payload: &str) -> Vec<String> {
    payload.split_whitespace().map(str::to_string).collect()
}

pub(crate) fn expect_kind(reply: &Message, expected: MessageKind) -> Result<()> {
    if MessageKind::parse(reply.kind()) == Some(expected) {
        return Ok(());
    }
    Err(ProtocolError::UnexpectedReply {
        expected: expected.to_string(),
        got: reply.to_string(),
    }
    .into())
}
