//! Swarm roles and their shared runtime pieces
//!
//! This library provides:
//! - The dispatcher, worker node and data store roles behind the [`Service`] trait
//! - Client helpers for requesting a worker and opening worker sessions
//! - The drone reading parser and the worker's resource sampler
//! - Configuration, metrics, shutdown handling and logging setup

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod parser;
pub mod periodic;
pub mod resources;
pub mod server;
pub mod service;
pub mod shutdown;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use client::{Assignment, DispatcherClient, WorkerSession};
pub use config::{load_yaml, DispatcherConfig, StoreConfig, WorkerConfig};
pub use dispatcher::{DispatchService, Dispatcher, NO_SERVERS_AVAILABLE};
pub use error::{NodeError, Result};
pub use metrics::DispatchMetrics;
pub use parser::DroneReading;
pub use resources::ResourceSampler;
pub use service::{run_until_ctrl_c, Service};
pub use shutdown::{ShutdownListener, ShutdownSignal, TaskSet};
pub use store::{DataStore, RecordStore, StoreClient, StoredRecord};
pub use telemetry::{init_tracing, LogFormat};
pub use worker::{WorkerNode, WorkerService};
