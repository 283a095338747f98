//! Transport Error Types
//!
//! Every way an outbound command can fail, from the gate checks that run
//! before any I/O to the peer's own error replies.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of the correlated request channel
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// No open socket and no saved connection parameters to lazily connect with
    #[error("Not connected to the design plugin relay")]
    NotConnected,

    /// The socket did not finish its handshake within the connect timeout
    #[error("Connection to {url} timed out after {elapsed:?}")]
    ConnectTimeout { url: String, elapsed: Duration },

    /// The socket closed while the request was in flight
    #[error("Connection closed (code {code}): {reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// Command issued before a channel was joined
    #[error("Must join a channel before sending '{command}'")]
    ChannelRequired { command: String },

    /// Join requested with an unusable channel name
    #[error("Invalid channel name: {0:?}")]
    InvalidChannel(String),

    /// Progressive timeout exhausted every extension round
    #[error("Request '{command}' timed out after {elapsed:?}")]
    Timeout { command: String, elapsed: Duration },

    /// Request evicted by the staleness sweep
    #[error("Request '{command}' abandoned after {idle:?} without activity")]
    Stale { command: String, idle: Duration },

    /// The peer replied with an error field
    #[error("{0}")]
    Peer(String),

    /// Writing the frame to the socket failed
    #[error("Failed to send frame: {0}")]
    Send(String),

    /// Encoding the outbound envelope failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TransportError {
    /// Create a connection closed error
    pub fn connection_closed(code: u16, reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            code,
            reason: reason.into(),
        }
    }

    /// Create a channel required error
    pub fn channel_required(command: impl Into<String>) -> Self {
        Self::ChannelRequired {
            command: command.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(command: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            command: command.into(),
            elapsed,
        }
    }

    /// Create a peer error from whatever shape the peer used for `error`
    pub fn peer(error: &serde_json::Value) -> Self {
        match error {
            serde_json::Value::String(message) => Self::Peer(message.clone()),
            serde_json::Value::Object(map) => match map.get("message").and_then(|m| m.as_str()) {
                Some(message) => Self::Peer(message.to_string()),
                None => Self::Peer(error.to_string()),
            },
            other => Self::Peer(other.to_string()),
        }
    }

    /// True for failures caused by the socket going away
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::ConnectTimeout { .. } | Self::ConnectionClosed { .. }
        )
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
