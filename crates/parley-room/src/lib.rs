//! Room membership and broadcast engine for Parley.
//!
//! Clients live in exactly one room at a time. Rooms fan messages out
//! under the mute policy, evict members whose transport died, and close
//! themselves when the last member leaves (the lobby excepted).
//!
//! # Key types
//!
//! - [`Client`]: one connected client: transport, session, room pointer
//! - [`Room`]: membership, delivery, and the per-room request handlers
//! - [`Registry`]: all open rooms, identity assignment, mute persistence
//! - [`Command`] / [`command::parse`]: chat text to server actions
//! - [`markup::render`]: chat markup to HTML
//! - [`games`]: dice and coin flips

mod client;
pub mod command;
mod error;
pub mod games;
pub mod markup;
mod registry;
mod room;

pub use client::Client;
pub use command::{Command, DiceLimits};
pub use error::{CommandError, RoomError};
pub use registry::{LOBBY, Registry};
pub use room::{Room, SHUTDOWN_NOTICE};
