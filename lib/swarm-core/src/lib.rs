//! Core protocol and registry functionality
//!
//! This library provides:
//! - The `kind|payload` wire message codec and the known message kinds
//! - Worker load reports exchanged on the discovery channel
//! - The dispatcher's service registry and its selection strategies

pub mod balancer;
pub mod endpoint;
pub mod error;
pub mod kind;
pub mod message;
pub mod registry;
pub mod report;

pub use balancer::LoadBalancingStrategy;
pub use endpoint::NodeAddress;
pub use error::{EncodingError, ProtocolError, Result};
pub use kind::MessageKind;
pub use message::{encode, Message, DELIMITER};
pub use registry::{RegistryEntry, ServiceRegistry, Upsert};
pub use report::NodeReport;
