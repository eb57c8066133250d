//! Client sessions for Parley.
//!
//! A [`Session`] is everything the server knows about *who* is on the
//! other end of a connection:
//!
//! 1. **Identity**: the [`ClientId`](parley_protocol::ClientId) and
//!    display name, fixed once the client identifies ([`Identity`]).
//! 2. **Mute list**: the display names this client refuses to hear.
//! 3. **Persistence**: mute lists survive reconnects through a
//!    [`MuteStore`].
//!
//! # How it fits in the stack
//!
//! ```text
//! Room Layer (above)  ← asks sessions who is muted before delivering
//!     ↕
//! Session Layer (this crate)  ← identity, mute sets, mute persistence
//!     ↕
//! Protocol Layer (below)  ← provides ClientId
//! ```

mod error;
mod ids;
mod policy;
mod session;
mod store;

pub use error::SessionError;
pub use ids::IdAllocator;
pub use policy::MutePolicy;
pub use session::{Identity, Session, SessionState, validate_name};
pub use store::{FileMuteStore, MemoryMuteStore, MuteStore};
