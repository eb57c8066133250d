//! In-process transport built on Tokio channels.
//!
//! [`MemoryTransport`] hands out server-side [`MemoryConnection`]s; the
//! matching [`MemoryPeer`] is the client end. Dropping or closing a peer
//! makes server-side sends fail, which is how tests simulate a client
//! that vanished mid-broadcast.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};

use crate::{Connection, ConnectionId, Transport, TransportError};

type FrameSender = mpsc::UnboundedSender<Vec<u8>>;
type FrameReceiver = mpsc::UnboundedReceiver<Vec<u8>>;

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    outbound: Mutex<Option<FrameSender>>,
    inbound: Mutex<FrameReceiver>,
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    id: ConnectionId,
    outbound: Mutex<Option<FrameSender>>,
    inbound: Mutex<FrameReceiver>,
}

impl MemoryConnection {
    /// Creates a connected server/client pair.
    pub fn pair(id: ConnectionId) -> (MemoryConnection, MemoryPeer) {
        let (to_peer, from_server) = mpsc::unbounded_channel();
        let (to_server, from_peer) = mpsc::unbounded_channel();
        let conn = MemoryConnection {
            id,
            outbound: Mutex::new(Some(to_peer)),
            inbound: Mutex::new(from_peer),
        };
        let peer = MemoryPeer {
            id,
            outbound: Mutex::new(Some(to_server)),
            inbound: Mutex::new(from_server),
        };
        (conn, peer)
    }
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let outbound = self.outbound.lock().await;
        let sender = outbound.as_ref().ok_or(TransportError::Closed(self.id))?;
        sender
            .send(data.to_vec())
            .map_err(|_| TransportError::Closed(self.id))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.inbound.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        // Dropping the sender ends the peer's receive stream.
        self.outbound.lock().await.take();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

impl MemoryPeer {
    /// Returns the id shared with the server-side connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Sends a frame to the server.
    pub async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let outbound = self.outbound.lock().await;
        let sender = outbound.as_ref().ok_or(TransportError::Closed(self.id))?;
        sender
            .send(data.to_vec())
            .map_err(|_| TransportError::Closed(self.id))
    }

    /// Receives the next frame from the server, or `None` once the
    /// server closed the connection.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.inbound.lock().await.recv().await
    }

    /// Returns a frame if one is already queued.
    pub async fn try_recv(&self) -> Option<Vec<u8>> {
        self.inbound.lock().await.try_recv().ok()
    }

    /// Closes the client side. The server observes a clean close on its
    /// next `recv`, and its sends start failing.
    pub async fn close(&self) {
        self.outbound.lock().await.take();
        self.inbound.lock().await.close();
    }
}

/// A [`Transport`] whose connections are created by a [`MemoryConnector`].
pub struct MemoryTransport {
    incoming: mpsc::UnboundedReceiver<MemoryConnection>,
}

/// Opens new in-memory connections to a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryConnector {
    sender: mpsc::UnboundedSender<MemoryConnection>,
    next_id: Arc<AtomicU64>,
}

impl MemoryTransport {
    /// Creates a transport and the connector that feeds it.
    pub fn new() -> (MemoryTransport, MemoryConnector) {
        let (sender, incoming) = mpsc::unbounded_channel();
        let connector = MemoryConnector {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (MemoryTransport { incoming }, connector)
    }
}

impl MemoryConnector {
    /// Opens a connection and returns the client end.
    pub fn connect(&self) -> Result<MemoryPeer, TransportError> {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (conn, peer) = MemoryConnection::pair(id);
        self.sender
            .send(conn)
            .map_err(|_| TransportError::Shutdown)?;
        tracing::debug!(%id, "opened in-memory connection");
        Ok(peer)
    }
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        self.incoming.recv().await.ok_or(TransportError::Shutdown)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_moves_frames_both_ways() {
        let (conn, peer) = MemoryConnection::pair(ConnectionId::new(1));

        conn.send(b"to peer").await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), b"to peer");

        peer.send(b"to server").await.unwrap();
        assert_eq!(conn.recv().await.unwrap().unwrap(), b"to server");
    }

    #[tokio::test]
    async fn test_send_fails_after_peer_dropped() {
        let (conn, peer) = MemoryConnection::pair(ConnectionId::new(2));
        drop(peer);

        let result = conn.send(b"anyone?").await;
        assert!(matches!(result, Err(TransportError::Closed(_))));
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (conn, peer) = MemoryConnection::pair(ConnectionId::new(3));
        conn.close().await.unwrap();

        assert!(peer.recv().await.is_none());
        assert!(conn.send(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_peer_close_is_clean_eof_for_server() {
        let (conn, peer) = MemoryConnection::pair(ConnectionId::new(4));
        peer.close().await;

        assert!(conn.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connector_feeds_transport() {
        let (mut transport, connector) = MemoryTransport::new();
        let peer = connector.connect().unwrap();

        let conn = transport.accept().await.unwrap();
        assert_eq!(conn.id(), peer.id());
    }

    #[tokio::test]
    async fn test_accept_reports_shutdown_when_connectors_dropped() {
        let (mut transport, connector) = MemoryTransport::new();
        drop(connector);

        let result = transport.accept().await;
        assert!(matches!(result, Err(TransportError::Shutdown)));
    }
}
