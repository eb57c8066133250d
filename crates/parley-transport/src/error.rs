//! Error types for the transport layer.

use crate::ConnectionId;

/// Errors that can occur while moving frames between client and server.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was already closed by either side.
    #[error("{0} is closed")]
    Closed(ConnectionId),

    /// Writing a frame to the peer failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Reading a frame from the peer failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding the listener or accepting a connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The transport stopped producing connections.
    #[error("transport shut down")]
    Shutdown,
}
