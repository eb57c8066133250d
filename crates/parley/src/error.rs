//! Unified error type for the Parley server.

use parley_protocol::ProtocolError;
use parley_room::RoomError;
use parley_session::SessionError;
use parley_transport::TransportError;

use crate::config::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// `#[from]` on each variant lets `?` convert sub-crate errors directly.
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (bad name, double identify, mute store).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A room-level error (missing, duplicate, closed).
    #[error(transparent)]
    Room(#[from] RoomError),

    /// The configuration file could not be read or parsed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use parley_transport::ConnectionId;

    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::Closed(ConnectionId::new(9));
        let parley_err: ParleyError = err.into();
        assert!(matches!(parley_err, ParleyError::Transport(_)));
        assert!(parley_err.to_string().contains("conn-9"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let parley_err: ParleyError = err.into();
        assert!(matches!(parley_err, ParleyError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let parley_err: ParleyError = SessionError::InvalidName.into();
        assert!(matches!(parley_err, ParleyError::Session(_)));
    }

    #[test]
    fn test_from_room_error() {
        let err = RoomError::NotFound("games".into());
        let parley_err: ParleyError = err.into();
        assert!(matches!(parley_err, ParleyError::Room(_)));
        assert_eq!(parley_err.to_string(), "room games doesn't exist");
    }
}
