//! Connection trait and close parameters
//!
//! The transport layer (handshake, framing, socket I/O) implements
//! [`Connection`]. Sessions only hold a weak reference to it; the transport
//! owns the connection for its whole life.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;

/// Maximum length in bytes of a close reason (a close frame payload is at
/// most 125 bytes, two of which carry the code).
pub const MAX_CLOSE_REASON_LEN: usize = 123;

/// WebSocket close status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CloseCode {
    Normal = 1000,
    Away = 1001,
    ProtocolError = 1002,
    UnsupportedData = 1003,
    Undefined = 1004,
    NoStatus = 1005,
    Abnormal = 1006,
    InvalidData = 1007,
    PolicyViolation = 1008,
    TooBig = 1009,
    MandatoryExtension = 1010,
    ServerError = 1011,
    TlsHandshakeFailure = 1015,
}

impl CloseCode {
    /// Numeric status code
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether this code may be sent in a close frame by a server
    pub fn is_sendable(self) -> bool {
        !matches!(
            self,
            Self::Undefined | Self::Abnormal | Self::TlsHandshakeFailure
        )
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.as_u16(), self)
    }
}

/// Validate a close code and reason pair.
///
/// Returns a description of the problem, or `None` if the pair is valid.
pub fn check_close_parameters(code: CloseCode, reason: &str) -> Option<String> {
    if !code.is_sendable() {
        return Some(format!("{code} cannot be used in a close frame"));
    }
    if code == CloseCode::NoStatus && !reason.is_empty() {
        return Some(format!("{code} cannot be used with a reason"));
    }
    if reason.len() > MAX_CLOSE_REASON_LEN {
        return Some(format!(
            "The reason is {} bytes, more than {MAX_CLOSE_REASON_LEN}",
            reason.len()
        ));
    }
    None
}

/// A message delivered to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(data)
    }
}

/// Transport-side handle for one upgraded WebSocket connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Non-blocking liveness probe
    fn is_alive(&self) -> bool;

    /// Deliver a payload to the peer
    async fn send(&self, payload: &Payload) -> Result<(), ConnectionError>;

    /// Start the closing handshake
    async fn close(&self, code: CloseCode, reason: &str) -> Result<(), ConnectionError>;

    /// Ping the peer and report whether it answered.
    ///
    /// Transports without ping support fall back to the liveness probe.
    async fn ping(&self) -> bool {
        self.is_alive()
    }
}
