use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Failure to put a message on the wire
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Message kind contains the '|' delimiter: {0}")]
    DelimiterInKind(String),

    #[error("Message contains a line break and cannot be sent over a line transport")]
    LineBreak,
}

/// Well-formed transport traffic that does not follow the protocol
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Malformed discovery report '{payload}': {reason}")]
    MalformedReport { payload: String, reason: String },

    #[error("Malformed node address: {0}")]
    MalformedAddress(String),

    #[error("Unexpected reply: expected {expected}, got {got}")]
    UnexpectedReply { expected: String, got: String },

    #[error("Malformed sensor reading: {0}")]
    MalformedReading(String),
}

impl ProtocolError {
    pub(crate) fn malformed_report(payload: &str, reason: impl Into<String>) -> Self {
        ProtocolError::MalformedReport {
            payload: payload.to_string(),
            reason: reason.into(),
        }
    }
}
