//! Error types for the connection engine.

use hasslife_protocol::FrameError;

/// Reasons a connection attempt or an established epoch ends.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("write timed out")]
    WriteTimeout,

    #[error("no inbound traffic for {idle_secs:.1}s")]
    HeartbeatTimeout { idle_secs: f64 },

    #[error("peer reported error: {reason}")]
    PeerError { reason: String },

    #[error("outbound queue closed")]
    QueueClosed,

    #[error("cancelled")]
    Cancelled,

    #[error("connection task failed: {0}")]
    Task(String),
}

impl ConnectionError {
    /// Returns `true` if no reconnect should follow this error.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionError::PeerError { .. })
    }
}

/// Errors returned when enqueueing an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("outbound queue full, message dropped")]
    Full,

    #[error("outbound queue closed")]
    Closed,
}

/// Errors reported by a [`ServiceInvoker`](crate::provider::ServiceInvoker).
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("service {domain}.{service} not found")]
    NotFound { domain: String, service: String },

    #[error("invalid service data: {0}")]
    InvalidData(String),

    #[error("service call failed: {0}")]
    Failed(String),
}

/// Errors from the client's public API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client already started")]
    AlreadyStarted,

    #[error("client stopped")]
    Stopped,
}
