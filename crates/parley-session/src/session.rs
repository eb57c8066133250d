//! Session types: who a client is and whom it refuses to hear.
//!
//! A session is created the moment a transport connection is accepted,
//! before the client has said anything. It becomes *identified* once
//! the client picks a display name; from then on the identity never
//! changes.

use std::sync::OnceLock;

use dashmap::DashSet;
use parley_protocol::ClientId;

use crate::SessionError;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Where a client is in its lifecycle.
///
/// ```text
///   Connected ──(identify)──→ Identified ──(join lobby)──→ Joined
///       │                         │                          │
///       └─────────────────────────┴──────(disconnect)────────┴──→ Closed
/// ```
///
/// - **Connected**: transport accepted, no display name yet.
/// - **Identified**: id assigned and mute list loaded, not yet in a room.
/// - **Joined**: member of exactly one room.
/// - **Closed**: torn down; never leaves this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Identified,
    Joined,
    Closed,
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The immutable identity a client receives when it identifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: ClientId,
    pub name: String,
}

/// Trims `name` and checks what is left.
///
/// # Errors
/// - [`SessionError::InvalidName`] for empty or blank names
/// - [`SessionError::ControlCharacters`] if a control character (a
///   newline, say) remains after trimming
pub fn validate_name(name: &str) -> Result<&str, SessionError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SessionError::InvalidName);
    }
    if trimmed.chars().any(char::is_control) {
        return Err(SessionError::ControlCharacters);
    }
    Ok(trimmed)
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The server's record of one client.
///
/// The mute set is written only by the owning client's task but read by
/// every room broadcast, so it lives in a `DashSet` rather than behind
/// the room lock.
#[derive(Debug, Default)]
pub struct Session {
    identity: OnceLock<Identity>,
    mutes: DashSet<String>,
}

impl Session {
    /// Creates an unidentified session with an empty mute list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixes this session's identity.
    ///
    /// # Errors
    /// - [`SessionError::InvalidName`] if `name` is blank
    /// - [`SessionError::AlreadyIdentified`] if an identity was already set
    pub fn identify(&self, id: ClientId, name: &str) -> Result<&Identity, SessionError> {
        let name = validate_name(name)?;
        if let Some(existing) = self.identity.get() {
            return Err(SessionError::AlreadyIdentified(existing.id));
        }
        let identity = Identity {
            id,
            name: name.to_string(),
        };
        // A concurrent caller may have won the race between get() and set().
        self.identity
            .set(identity)
            .map_err(|_| SessionError::AlreadyIdentified(id))?;
        self.identity.get().ok_or(SessionError::AlreadyIdentified(id))
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    pub fn is_identified(&self) -> bool {
        self.identity.get().is_some()
    }

    /// The assigned id, or `None` before identification.
    pub fn id(&self) -> Option<ClientId> {
        self.identity.get().map(|identity| identity.id)
    }

    /// The display name, or an empty string before identification.
    pub fn name(&self) -> &str {
        self.identity
            .get()
            .map(|identity| identity.name.as_str())
            .unwrap_or_default()
    }

    // -- mute list ----------------------------------------------------------

    /// Adds `name` (trimmed) to the mute list. Returns `false` if it was
    /// already muted or isn't a valid display name.
    pub fn mute(&self, name: &str) -> bool {
        match validate_name(name) {
            Ok(name) => self.mutes.insert(name.to_string()),
            Err(_) => false,
        }
    }

    /// Removes `name` (trimmed) from the mute list. Returns `false` if it
    /// wasn't muted.
    pub fn unmute(&self, name: &str) -> bool {
        self.mutes.remove(name.trim()).is_some()
    }

    /// Whether this client refuses to hear `name`. Names compare exactly.
    pub fn is_muted(&self, name: &str) -> bool {
        self.mutes.contains(name)
    }

    /// Replaces the mute list, e.g. with what a [`MuteStore`](crate::MuteStore)
    /// loaded.
    pub fn replace_mutes(&self, names: impl IntoIterator<Item = String>) {
        self.mutes.clear();
        for name in names {
            self.mutes.insert(name);
        }
    }

    /// The muted names, sorted for stable persistence.
    pub fn muted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.mutes.iter().map(|n| n.key().clone()).collect();
        names.sort();
        names
    }
}
