//! Error types for the room layer.

/// Errors from room lookups, creation, and joins.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// No room with this name exists.
    #[error("room {0} doesn't exist")]
    NotFound(String),

    /// A room with this name (ignoring case) already exists.
    #[error("room {0} already exists")]
    AlreadyExists(String),

    /// Room names must contain something other than whitespace.
    #[error("room name must not be empty")]
    InvalidName,

    /// The room closed before the operation reached it. The client was
    /// placed in the lobby instead.
    #[error("room {0} is no longer running")]
    NotRunning(String),

    /// Only identified clients can be room members.
    #[error("client has not identified yet")]
    Unidentified,
}

/// A chat command that couldn't be parsed. Reported back to the client
/// that typed it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command /{0}")]
    Unknown(String),

    #[error("usage: {0}")]
    MissingArgument(&'static str),

    #[error("invalid dice {0:?}: use /roll N or /roll NdM with N and M at least 1")]
    InvalidDice(String),

    #[error("too many dice: at most {max_rolls} dice with up to {max_sides} sides")]
    DiceLimit { max_rolls: u32, max_sides: u32 },

    #[error("invalid private message target {0:?}: use @<id> <message>")]
    InvalidTarget(String),

    #[error("private message is empty")]
    EmptyMessage,

    #[error("message is too long: at most {max} characters")]
    TooLong { max: usize },
}
