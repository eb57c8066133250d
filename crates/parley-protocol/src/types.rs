//! Core protocol types for Parley's wire format.
//!
//! Everything in this module travels on the wire: clients send
//! [`ClientMessage`]s, the server answers with [`ServerMessage`]s, and
//! both are wrapped in an [`Envelope`].

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The numeric identity the server assigns to a client once it has
/// chosen a display name.
///
/// `#[serde(transparent)]` keeps it a plain number on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ClientMessage: client → server
// ---------------------------------------------------------------------------

/// Requests a client can make.
///
/// Internally tagged: `{ "type": "JoinRoom", "name": "games" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// First message of a session: "call me `name`".
    Connect { name: String },

    /// "I'm leaving the server."
    Disconnect,

    /// Create a room and move into it.
    CreateRoom { name: String },

    /// Move into an existing room.
    JoinRoom { name: String },

    /// List rooms whose name contains `query` (empty = all).
    ListRooms {
        #[serde(default)]
        query: String,
    },

    /// Chat text for the current room. Text starting with `/` or `@`
    /// is interpreted as a command by the server.
    Message { text: String },

    /// Private message to another client in the same room.
    PrivateMessage { target: ClientId, text: String },

    /// Stop hearing from the client with this display name.
    Mute { name: String },

    /// Hear from the client with this display name again.
    Unmute { name: String },

    /// Roll `rolls` dice with `sides` faces each.
    Roll { rolls: u32, sides: u32 },

    /// Flip a coin.
    Flip,
}

// ---------------------------------------------------------------------------
// ServerMessage: server → client
// ---------------------------------------------------------------------------

/// Events the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// "This is who you are." Sent once, right after `Connect`.
    ClientId {
        client_id: ClientId,
        client_name: String,
    },

    /// Silent membership sync: `client_id` is already in your room.
    SyncClient {
        client_id: ClientId,
        client_name: String,
    },

    /// Someone joined (`joined: true`) or left (`joined: false`) `room`.
    RoomAction {
        client_id: ClientId,
        client_name: String,
        room: String,
        joined: bool,
    },

    /// Someone in your room disconnected from the server.
    Disconnect {
        client_id: ClientId,
        client_name: String,
    },

    /// Result of a `ListRooms` query.
    RoomList { rooms: Vec<String> },

    /// A rendered room message. `sender_id` is `None` for
    /// system-originated lines.
    Message {
        sender_id: Option<ClientId>,
        sender_name: Option<String>,
        text: String,
    },

    /// A private message addressed to you.
    PrivateMessage {
        sender_id: ClientId,
        sender_name: String,
        text: String,
    },

    /// `client_name` muted (`muted: true`) or unmuted you.
    MuteChanged {
        client_id: ClientId,
        client_name: String,
        muted: bool,
    },

    /// A system notice meant only for you (errors, confirmations).
    Notice { text: String },
}

impl ServerMessage {
    /// Shorthand for a [`ServerMessage::Notice`].
    pub fn notice(text: impl Into<String>) -> Self {
        Self::Notice { text: text.into() }
    }
}

// ---------------------------------------------------------------------------
// Envelope: the top-level wire format
// ---------------------------------------------------------------------------

/// The top-level message wrapper. Every frame on the wire is one
/// envelope around a client or server payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<P> {
    /// Per-sender sequence number. Each side keeps its own counter.
    #[serde(default)]
    pub seq: u64,

    /// Milliseconds since the Unix epoch at the sender.
    #[serde(default)]
    pub timestamp: u64,

    /// The message itself.
    pub payload: P,
}

impl<P> Envelope<P> {
    /// Wraps `payload`, stamping it with the current wall-clock time.
    pub fn new(seq: u64, payload: P) -> Self {
        Self {
            seq,
            timestamp: unix_millis(),
            payload,
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// =========================================================================
// Tests
// =========================================================================
