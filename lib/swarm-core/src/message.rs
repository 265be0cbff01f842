//! Wire message codec shared by every role
//!
//! A message is a `(kind, payload)` pair encoded as `kind|payload`. Decoding
//! splits on the first delimiter only, so payloads may carry further `|`
//! characters (the dispatcher relies on this to nest a tagged message inside a
//! `DRONE_REQUEST` payload).

use crate::error::EncodingError;
use std::fmt;

/// Separator between the message kind and its payload
pub const DELIMITER: char = '|';

/// A decoded wire message
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Message {
    kind: String,
    payload: String,
}

impl Message {
    /// Create a message; validity of `kind` is checked at encode time
    pub fn new(kind: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// The no-op message produced by a failed group receive
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// True when the kind is empty, i.e. the "nothing received" sentinel
    pub fn is_empty(&self) -> bool {
        self.kind.is_empty()
    }

    /// Encode into `kind|payload`
    pub fn encode(&self) -> Result<String, EncodingError> {
        encode(&self.kind, &self.payload)
    }

    /// Decode a raw line. Never fails: input without a delimiter becomes a
    /// message with that input as kind and an empty payload.
    pub fn decode(raw: &str) -> Self {
        match raw.split_once(DELIMITER) {
            Some((kind, payload)) => Self::new(kind, payload),
            None => Self::new(raw, ""),
        }
    }

    /// Decode the payload as a nested message
    pub fn nested(&self) -> Message {
        Message::decode(&self.payload)
    }

    pub fn into_parts(self) -> (String, String) {
        (self.kind, self.payload)
    }
}

/// Encode a kind and payload into a single delimited string
pub fn encode(kind: &str, payload: &str) -> Result<String, EncodingError> {
    if kind.contains(DELIMITER) {
        return Err(EncodingError::DelimiterInKind(kind.to_string()));
    }

    let mut out = String::with_capacity(kind.len() + payload.len() + 1);
    out.push_str(kind);
    out.push(DELIMITER);
    out.push_str(payload);
    Ok(out)
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.kind, DELIMITER, self.payload)
    }
}
