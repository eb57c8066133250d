//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing a message into a frame failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The frame was malformed or didn't match any known message.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The frame decoded but isn't valid at this point of the
    /// conversation, e.g. anything other than `Connect` before the
    /// client has a name.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
