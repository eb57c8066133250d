//! # Parley
//!
//! A multi-room text chat server.
//!
//! Clients connect over a [`Transport`](parley_transport::Transport),
//! identify with a display name, land in the permanent lobby, and from
//! there create, list, and join named rooms. Rooms broadcast formatted
//! chat, relay private messages, honour per-user mute lists, and host
//! dice rolls and coin flips.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parley::prelude::*;
//!
//! # async fn start() -> Result<(), ParleyError> {
//! let config = ServerConfig::from_toml_str("bind_addr = \"0.0.0.0:3000\"")?;
//! let server = ParleyServerBuilder::from_config(&config).build().await?;
//! server.run().await
//! # }
//! ```

pub mod config;
mod error;
mod handler;
pub mod logging;
mod server;

pub use config::{ConfigError, LimitsConfig, ServerConfig};
pub use error::ParleyError;
pub use server::{ParleyServer, ParleyServerBuilder};

/// Everything needed to embed or drive a Parley server.
pub mod prelude {
    pub use crate::{
        ConfigError, LimitsConfig, ParleyError, ParleyServer, ParleyServerBuilder, ServerConfig,
    };
    pub use parley_protocol::{ClientId, ClientMessage, Codec, Envelope, JsonCodec, ServerMessage};
    pub use parley_room::{Client, LOBBY, Registry, Room};
    pub use parley_session::{FileMuteStore, MemoryMuteStore, MutePolicy, MuteStore};
    pub use parley_transport::{Connection, MemoryConnector, MemoryTransport, Transport};
}
