//! A connected chat client: transport, codec, and session in one place.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use parley_protocol::{ClientId, Codec, Envelope, JsonCodec, ServerMessage};
use parley_session::{Session, SessionState};
use parley_transport::{Connection, ConnectionId};
use tokio_util::sync::CancellationToken;

use crate::Room;

/// One client's end of the server.
///
/// The handler task owns the `Arc<Client>`; a [`Room`] holds a clone only
/// while the client is a member. The client points back at its room
/// through a `Weak` so a closed room is never kept alive by its former
/// members.
pub struct Client<C: Connection> {
    conn: C,
    codec: JsonCodec,
    session: Session,
    room: RwLock<Weak<Room<C>>>,
    cancel: CancellationToken,
    alive: AtomicBool,
    seq: AtomicU64,
}

impl<C: Connection> Client<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            codec: JsonCodec,
            session: Session::new(),
            room: RwLock::new(Weak::new()),
            cancel: CancellationToken::new(),
            alive: AtomicBool::new(true),
            seq: AtomicU64::new(1),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.conn.id()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The assigned id, or `None` until the client has identified.
    pub fn id(&self) -> Option<ClientId> {
        self.session.id()
    }

    /// The display name, or `""` until the client has identified.
    pub fn name(&self) -> &str {
        self.session.name()
    }

    /// Whether this client refuses to hear `name`.
    pub fn is_muted(&self, name: &str) -> bool {
        self.session.is_muted(name)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SessionState {
        if !self.is_alive() {
            SessionState::Closed
        } else if !self.session.is_identified() {
            SessionState::Connected
        } else if self.current_room().is_some() {
            SessionState::Joined
        } else {
            SessionState::Identified
        }
    }

    // -- room pointer -------------------------------------------------------

    /// The room this client is currently in, if it is still open.
    pub fn current_room(&self) -> Option<Arc<Room<C>>> {
        self.room
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    pub(crate) fn set_room(&self, room: &Arc<Room<C>>) {
        *self.room.write().unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(room);
    }

    /// Clears the room pointer, but only if it still points at `room`.
    pub(crate) fn clear_room_if(&self, room: &Room<C>) {
        let mut current = self.room.write().unwrap_or_else(PoisonError::into_inner);
        if std::ptr::eq(current.as_ptr(), room) {
            *current = Weak::new();
        }
    }

    // -- I/O ----------------------------------------------------------------

    /// Encodes `msg` in an envelope and sends it.
    ///
    /// Returns `false` if the client is already closed or the frame
    /// could not be delivered. Callers treat `false` as "evict me".
    pub async fn send(&self, msg: &ServerMessage) -> bool {
        if !self.is_alive() {
            return false;
        }
        let envelope = Envelope::new(self.seq.fetch_add(1, Ordering::Relaxed), msg);
        let frame = match self.codec.encode(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(conn = %self.conn.id(), error = %e, "failed to encode frame");
                return false;
            }
        };
        match self.conn.send(&frame).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(conn = %self.conn.id(), error = %e, "send failed");
                false
            }
        }
    }

    /// Waits for the next inbound frame.
    ///
    /// Returns `Ok(None)` on a clean close and as soon as
    /// [`disconnect`](Self::disconnect) is called, even if the
    /// transport's `recv` is still pending.
    pub async fn recv(&self) -> Result<Option<Vec<u8>>, C::Error> {
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(None),
            frame = self.conn.recv() => frame,
        }
    }

    /// Tears down the transport. Safe to call any number of times; only
    /// the first call does anything.
    pub async fn disconnect(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        if let Err(e) = self.conn.close().await {
            tracing::debug!(conn = %self.conn.id(), error = %e, "close failed");
        }
        tracing::debug!(conn = %self.conn.id(), client = self.name(), "client disconnected");
    }
}
