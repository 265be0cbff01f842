//! Message kinds understood by the dispatcher, workers and the data store

use std::fmt;

/// Known message kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Client asks for a worker assignment (or opens a worker session)
    UserRequest,
    /// Dispatcher's answer to a client
    DatacenterResponse,
    /// Dispatcher-side failure reported to a client
    DatacenterError,
    /// Reply to a request of a kind the receiver does not handle
    UnknownType,
    /// Raw sensor reading from ingress, or its tagged rebroadcast
    DroneRequest,
    /// Heartbeat solicitation broadcast by the dispatcher
    DiscoveryRequest,
    /// Worker's heartbeat answer carrying its load report
    DiscoveryReply,
    /// Worker's answer to a client session request
    ServerResponse,
    /// Client asks a worker for stored records
    DataRequest,
    SaveData,
    SaveResponse,
    GetData,
    GetResponse,
}

impl MessageKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::UserRequest => "USER_REQUEST",
            MessageKind::DatacenterResponse => "DATACENTER_RESPONSE",
            MessageKind::DatacenterError => "DATACENTER_ERROR",
            MessageKind::UnknownType => "UNKNOWN_TYPE",
            MessageKind::DroneRequest => "DRONE_REQUEST",
            MessageKind::DiscoveryRequest => "DISCOVERY_REQUEST",
            MessageKind::DiscoveryReply => "DISCOVERY_REPLY",
            MessageKind::ServerResponse => "SERVER_RESPONSE",
            MessageKind::DataRequest => "DATA_REQUEST",
            MessageKind::SaveData => "SAVE_DATA",
            MessageKind::SaveResponse => "SAVE_RESPONSE",
            MessageKind::GetData => "GET_DATA",
            MessageKind::GetResponse => "GET_RESPONSE",
        }
    }

    /// Parse a wire name. `DATACENTER_REQUEST` is accepted as an older name for
    /// `DISCOVERY_REQUEST`.
    pub fn parse(raw: &str) -> Option<Self> {
        let kind = match raw {
            "USER_REQUEST" => MessageKind::UserRequest,
            "DATACENTER_RESPONSE" => MessageKind::DatacenterResponse,
            "DATACENTER_ERROR" => MessageKind::DatacenterError,
            "UNKNOWN_TYPE" => MessageKind::UnknownType,
            "DRONE_REQUEST" => MessageKind::DroneRequest,
            "DISCOVERY_REQUEST" | "DATACENTER_REQUEST" => MessageKind::DiscoveryRequest,
            "DISCOVERY_REPLY" => MessageKind::DiscoveryReply,
            "SERVER_RESPONSE" => MessageKind::ServerResponse,
            "DATA_REQUEST" => MessageKind::DataRequest,
            "SAVE_DATA" => MessageKind::SaveData,
            "SAVE_RESPONSE" => MessageKind::SaveResponse,
            "GET_DATA" => MessageKind::GetData,
            "GET_RESPONSE" => MessageKind::GetResponse,
            _ => return None,
        };
        Some(kind)
    }

    /// True for kinds that carry a worker load report on the group channel.
    /// Older workers announce themselves with `SERVER_RESPONSE`.
    pub fn is_load_report(&self) -> bool {
        matches!(self, MessageKind::DiscoveryReply | MessageKind::ServerResponse)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
