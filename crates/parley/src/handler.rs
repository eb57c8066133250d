//! Per-connection handler: identification and message routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive `Connect { name }` → identify, send `ClientId`
//!   2. Join the lobby
//!   3. Loop: receive envelopes → dispatch to the client's current room

use std::sync::Arc;
use std::time::Duration;

use parley_protocol::{ClientMessage, Codec, Envelope, JsonCodec, ProtocolError, ServerMessage};
use parley_room::command::{self, Command};
use parley_room::{Client, CommandError, Registry};
use parley_session::{Identity, SessionError};
use parley_transport::{Connection, TransportError};

use crate::ParleyError;
use crate::config::LimitsConfig;
use crate::server::ServerState;

/// Drop guard that tears a client down when its handler exits.
///
/// This runs on every exit path, including panics. `Drop` is
/// synchronous, so the async teardown runs on a spawned task.
struct ClientGuard<C: Connection> {
    client: Arc<Client<C>>,
    registry: Arc<Registry<C>>,
}

impl<C: Connection> Drop for ClientGuard<C> {
    fn drop(&mut self) {
        let client = Arc::clone(&self.client);
        let registry = Arc::clone(&self.registry);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                registry.disconnect(&client).await;
            });
        }
    }
}

/// What the read loop should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C>(
    conn: C,
    state: Arc<ServerState<C>>,
) -> Result<(), ParleyError>
where
    C: Connection<Error = TransportError>,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let client = Arc::new(Client::new(conn));
    let _guard = ClientGuard {
        client: Arc::clone(&client),
        registry: Arc::clone(&state.registry),
    };

    // --- Step 1: Identify ---
    let identity = match tokio::time::timeout(state.handshake_timeout, await_connect(&client, &state)).await {
        Ok(result) => result?,
        Err(_) => return Err(invalid("handshake timed out")),
    };
    client
        .send(&ServerMessage::ClientId {
            client_id: identity.id,
            client_name: identity.name.clone(),
        })
        .await;

    // --- Step 2: Lobby ---
    state.registry.join_lobby(&client).await?;

    // --- Step 3: Message loop ---
    while let Some(frame) = next_frame(&client, state.idle_timeout).await? {
        let envelope: Envelope<ClientMessage> = match JsonCodec.decode(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(client_id = %identity.id, error = %e, "failed to decode envelope");
                continue;
            }
        };
        if dispatch(&client, &state, envelope.payload).await? == Flow::Close {
            tracing::info!(client_id = %identity.id, "client disconnected");
            break;
        }
    }

    // _guard drops here → room teardown fires.
    Ok(())
}

/// Waits for the `Connect` that names this client.
///
/// Undecodable frames are skipped. Anything other than `Connect` gets a
/// notice, as does a blank name; the client may try again until the
/// handshake timeout.
async fn await_connect<C>(client: &Arc<Client<C>>, state: &ServerState<C>) -> Result<Identity, ParleyError>
where
    C: Connection<Error = TransportError>,
{
    loop {
        let Some(frame) = client.recv().await? else {
            return Err(invalid("connection closed before Connect"));
        };
        let envelope: Envelope<ClientMessage> = match JsonCodec.decode(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(conn = %client.connection_id(), error = %e, "failed to decode handshake");
                continue;
            }
        };
        let name = match envelope.payload {
            ClientMessage::Connect { name } => name,
            ClientMessage::Disconnect => return Err(invalid("client left before Connect")),
            _ => {
                client
                    .send(&ServerMessage::notice("Send Connect with a display name first"))
                    .await;
                continue;
            }
        };
        match state.registry.identify(client, &name).await {
            Ok(identity) => return Ok(identity),
            Err(e @ (SessionError::InvalidName | SessionError::ControlCharacters)) => {
                client.send(&ServerMessage::notice(e.to_string())).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Receives the next frame, or `None` once the client is gone or has
/// been idle for longer than `idle`.
async fn next_frame<C>(client: &Client<C>, idle: Option<Duration>) -> Result<Option<Vec<u8>>, ParleyError>
where
    C: Connection<Error = TransportError>,
{
    let received = match idle {
        Some(limit) => match tokio::time::timeout(limit, client.recv()).await {
            Ok(received) => received,
            Err(_) => {
                tracing::info!(client_id = ?client.id(), "idle timeout");
                return Ok(None);
            }
        },
        None => client.recv().await,
    };
    match received? {
        Some(frame) => Ok(Some(frame)),
        None => {
            tracing::info!(client_id = ?client.id(), "connection closed");
            Ok(None)
        }
    }
}

/// Routes one client message to the client's current room.
async fn dispatch<C>(
    client: &Arc<Client<C>>,
    state: &ServerState<C>,
    msg: ClientMessage,
) -> Result<Flow, ParleyError>
where
    C: Connection<Error = TransportError>,
{
    let command = match to_command(msg, &state.limits) {
        Ok(Some(command)) => command,
        Ok(None) => {
            client
                .send(&ServerMessage::notice(format!(
                    "Already connected as {}",
                    client.name()
                )))
                .await;
            return Ok(Flow::Continue);
        }
        Err(e) => {
            tracing::debug!(client_id = ?client.id(), error = %e, "rejected command");
            client.send(&ServerMessage::notice(e.to_string())).await;
            return Ok(Flow::Continue);
        }
    };

    let room = match client.current_room() {
        Some(room) => room,
        None => {
            state.registry.join_lobby(client).await?;
            Arc::clone(state.registry.lobby())
        }
    };

    match command {
        Command::Chat(text) => room.send_message(Some(client), &text).await,
        Command::Roll { rolls, sides } => room.handle_roll(client, rolls, sides).await,
        Command::Flip => room.handle_flip(client).await,
        Command::Mute(name) => room.handle_mute(client, &name).await,
        Command::Unmute(name) => room.handle_unmute(client, &name).await,
        Command::PrivateMessage { target, text } => {
            room.send_private_message(target, &text, client).await;
        }
        Command::CreateRoom(name) => room.handle_create_room(client, &name).await,
        Command::JoinRoom(name) => room.handle_join_room(client, &name).await,
        Command::ListRooms(query) => room.handle_list_rooms(client, &query).await,
        Command::Disconnect => return Ok(Flow::Close),
    }
    Ok(Flow::Continue)
}

/// Maps a wire message onto a room command, applying the configured
/// limits. Returns `None` for a repeated `Connect`.
fn to_command(msg: ClientMessage, limits: &LimitsConfig) -> Result<Option<Command>, CommandError> {
    let command = match msg {
        ClientMessage::Connect { .. } => return Ok(None),
        ClientMessage::Disconnect => Command::Disconnect,
        ClientMessage::CreateRoom { name } => Command::CreateRoom(name),
        ClientMessage::JoinRoom { name } => Command::JoinRoom(name),
        ClientMessage::ListRooms { query } => Command::ListRooms(query),
        ClientMessage::Message { text } => {
            check_length(&text, limits)?;
            command::parse(&text, &limits.dice())?
        }
        ClientMessage::PrivateMessage { target, text } => {
            check_length(&text, limits)?;
            if text.trim().is_empty() {
                return Err(CommandError::EmptyMessage);
            }
            Command::PrivateMessage { target, text }
        }
        ClientMessage::Mute { name } => Command::Mute(mute_target(name, "/mute <name>")?),
        ClientMessage::Unmute { name } => Command::Unmute(mute_target(name, "/unmute <name>")?),
        ClientMessage::Roll { rolls, sides } => {
            limits.dice().check(rolls, sides)?;
            Command::Roll { rolls, sides }
        }
        ClientMessage::Flip => Command::Flip,
    };
    Ok(Some(command))
}

fn mute_target(name: String, usage: &'static str) -> Result<String, CommandError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CommandError::MissingArgument(usage));
    }
    Ok(trimmed.to_string())
}

fn check_length(text: &str, limits: &LimitsConfig) -> Result<(), CommandError> {
    if text.chars().count() > limits.max_message_len {
        return Err(CommandError::TooLong {
            max: limits.max_message_len,
        });
    }
    Ok(())
}

fn invalid(reason: &str) -> ParleyError {
    ParleyError::Protocol(ProtocolError::InvalidMessage(reason.to_string()))
}

#[cfg(test)]
mod tests {
    use parley_protocol::ClientId;
    use parley_room::DiceLimits;

    use super::*;

    fn limits() -> LimitsConfig {
        LimitsConfig {
            max_message_len: 10,
            ..LimitsConfig::default()
        }
    }

    #[test]
    fn test_repeated_connect_maps_to_none() {
        let msg = ClientMessage::Connect { name: "Alice".into() };
        assert_eq!(to_command(msg, &limits()), Ok(None));
    }

    #[test]
    fn test_chat_text_is_parsed_as_command() {
        let msg = ClientMessage::Message { text: "/roll 2d6".into() };
        assert_eq!(
            to_command(msg, &limits()),
            Ok(Some(Command::Roll { rolls: 2, sides: 6 }))
        );

        let msg = ClientMessage::Message { text: "hello".into() };
        assert_eq!(
            to_command(msg, &limits()),
            Ok(Some(Command::Chat("hello".into())))
        );
    }

    #[test]
    fn test_long_messages_are_rejected() {
        let msg = ClientMessage::Message {
            text: "x".repeat(11),
        };
        assert_eq!(
            to_command(msg, &limits()),
            Err(CommandError::TooLong { max: 10 })
        );

        let msg = ClientMessage::PrivateMessage {
            target: ClientId(1),
            text: "y".repeat(11),
        };
        assert_eq!(
            to_command(msg, &limits()),
            Err(CommandError::TooLong { max: 10 })
        );
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        let msg = ClientMessage::Message {
            text: "é".repeat(10),
        };
        assert!(to_command(msg, &limits()).is_ok());
    }

    #[test]
    fn test_blank_private_message_is_rejected() {
        let msg = ClientMessage::PrivateMessage {
            target: ClientId(1),
            text: "  ".into(),
        };
        assert_eq!(to_command(msg, &limits()), Err(CommandError::EmptyMessage));
    }

    #[test]
    fn test_typed_roll_respects_dice_limits() {
        let limits = LimitsConfig {
            max_rolls: 3,
            max_sides: 6,
            max_message_len: 100,
        };
        assert_eq!(
            to_command(ClientMessage::Roll { rolls: 3, sides: 6 }, &limits),
            Ok(Some(Command::Roll { rolls: 3, sides: 6 }))
        );
        assert_eq!(
            to_command(ClientMessage::Roll { rolls: 4, sides: 6 }, &limits),
            Err(CommandError::DiceLimit {
                max_rolls: 3,
                max_sides: 6
            })
        );
        assert!(matches!(
            to_command(ClientMessage::Roll { rolls: 0, sides: 6 }, &limits),
            Err(CommandError::InvalidDice(_))
        ));
        assert_eq!(limits.dice(), DiceLimits { max_rolls: 3, max_sides: 6 });
    }

    #[test]
    fn test_blank_mute_target_is_rejected() {
        assert_eq!(
            to_command(ClientMessage::Mute { name: "   ".into() }, &limits()),
            Err(CommandError::MissingArgument("/mute <name>"))
        );
        assert_eq!(
            to_command(ClientMessage::Unmute { name: String::new() }, &limits()),
            Err(CommandError::MissingArgument("/unmute <name>"))
        );
        assert_eq!(
            to_command(ClientMessage::Mute { name: " Bob ".into() }, &limits()),
            Ok(Some(Command::Mute("Bob".into())))
        );
    }

    #[test]
    fn test_structured_messages_map_directly() {
        assert_eq!(
            to_command(ClientMessage::JoinRoom { name: "games".into() }, &limits()),
            Ok(Some(Command::JoinRoom("games".into())))
        );
        assert_eq!(
            to_command(ClientMessage::ListRooms { query: "g".into() }, &limits()),
            Ok(Some(Command::ListRooms("g".into())))
        );
        assert_eq!(
            to_command(ClientMessage::Disconnect, &limits()),
            Ok(Some(Command::Disconnect))
        );
        assert_eq!(to_command(ClientMessage::Flip, &limits()), Ok(Some(Command::Flip)));
    }
}
