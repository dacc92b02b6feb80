//! The `error` module defines the error type shared by every layer of the relay.
//!
//! Per-connection failures are carried as `RelayError` values up to the
//! registry, which logs them and evicts the connection. Nothing here is ever
//! surfaced to the upstream event sources.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The connection was stopped; no further packets can be delivered.
    #[error("ws conn closed")]
    ConnectionClosed,

    /// Read or write failure on the websocket transport.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A topic outside the supported set.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// An outbound packet carrying a type tag that does not exist.
    #[error("unknown packet type: {0}")]
    UnknownPacketType(u8),

    /// The registry refused a new connection.
    #[error("connection from {remote} rejected: {reason}")]
    Rejected { remote: String, reason: String },
}

pub type Result<T> = std::result::Result<T, RelayError>;
