//! Error types for the session layer.

use parley_protocol::ClientId;

/// Errors that can occur while identifying a client or persisting its
/// mute list.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The requested display name is empty after trimming.
    #[error("display name must not be empty")]
    InvalidName,

    /// Display names are single-line text.
    #[error("display name must not contain control characters")]
    ControlCharacters,

    /// The session already has an identity; names are set once.
    #[error("client {0} is already identified")]
    AlreadyIdentified(ClientId),

    /// Reading or writing a persisted mute list failed.
    #[error("mute store failure for {name}: {source}")]
    Store {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
