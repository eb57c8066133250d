//! A chat room: membership, fan-out, and lifecycle.
//!
//! Every operation that touches the member map runs under the room's one
//! `tokio::sync::Mutex`, held for the whole delivery pass. Delivery never
//! fails the caller; a member whose send fails is collected and evicted
//! once the pass is over, and evicting can cascade (the eviction notice
//! itself may fail for someone else). When a non-lobby room ends up
//! empty it closes itself and unregisters from the [`Registry`].
//!
//! ```text
//!  lock members ─→ deliver to snapshot ─→ failures? ─→ evict ─┐
//!                                              ▲              │
//!                                              └──(notices)───┘
//!                                                     │
//!                                      empty & !lobby ─→ close
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use parley_protocol::{ClientId, ServerMessage};
use parley_session::{MutePolicy, SessionError, validate_name};
use parley_transport::Connection;
use tokio::sync::Mutex;

use crate::{Client, CommandError, Registry, RoomError, games, markup};

type Members<C> = HashMap<ClientId, Arc<Client<C>>>;

/// Notice broadcast to members of a room that is closing.
pub const SHUTDOWN_NOTICE: &str = "Room is shutting down, migrating to lobby";

pub struct Room<C: Connection> {
    name: String,
    lobby: bool,
    running: AtomicBool,
    policy: MutePolicy,
    members: Mutex<Members<C>>,
    registry: Weak<Registry<C>>,
}

impl<C: Connection> Room<C> {
    pub(crate) fn new(
        name: impl Into<String>,
        lobby: bool,
        policy: MutePolicy,
        registry: Weak<Registry<C>>,
    ) -> Self {
        Self {
            name: name.into(),
            lobby,
            running: AtomicBool::new(true),
            policy,
            members: Mutex::new(HashMap::new()),
            registry,
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_lobby(&self) -> bool {
        self.lobby
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn member_count(&self) -> usize {
        self.members.lock().await.len()
    }

    /// Member ids in ascending order.
    pub async fn member_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.members.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn contains(&self, id: ClientId) -> bool {
        self.members.lock().await.contains_key(&id)
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Adds `client` and announces it.
    ///
    /// Every member (the joiner too) gets a `RoomAction { joined: true }`,
    /// then the joiner gets one `SyncClient` per existing member. Returns
    /// `false` without side effects if the room isn't running, the
    /// client hasn't identified, or it is already a member.
    pub async fn add_client(self: &Arc<Self>, client: Arc<Client<C>>) -> bool {
        let mut members = self.members.lock().await;
        if !self.is_running() {
            return false;
        }
        let Some(id) = client.id() else {
            return false;
        };
        if members.contains_key(&id) {
            return false;
        }

        members.insert(id, Arc::clone(&client));
        client.set_room(self);
        tracing::info!(
            room = %self.name,
            client_id = %id,
            members = members.len(),
            "client joined"
        );

        let joined = ServerMessage::RoomAction {
            client_id: id,
            client_name: client.name().to_string(),
            room: self.name.clone(),
            joined: true,
        };
        let mut failed = deliver(&members, &joined, |_| true).await;

        if !failed.contains(&id) {
            for (other_id, other) in members.iter() {
                if *other_id == id {
                    continue;
                }
                let sync = ServerMessage::SyncClient {
                    client_id: *other_id,
                    client_name: other.name().to_string(),
                };
                if !client.send(&sync).await {
                    failed.push(id);
                    break;
                }
            }
        }

        self.reap(&mut members, failed).await;
        true
    }

    /// Graceful leave.
    ///
    /// The `RoomAction { joined: false }` goes out before the client is
    /// removed, so the leaver sees it as well. Returns `false` if the
    /// room isn't running or the client isn't a member.
    pub async fn remove_client(&self, client: &Arc<Client<C>>) -> bool {
        let mut members = self.members.lock().await;
        if !self.is_running() {
            return false;
        }
        let Some(id) = client.id() else {
            return false;
        };
        if !members.contains_key(&id) {
            return false;
        }

        let left = ServerMessage::RoomAction {
            client_id: id,
            client_name: client.name().to_string(),
            room: self.name.clone(),
            joined: false,
        };
        let mut failed = deliver(&members, &left, |_| true).await;
        members.remove(&id);
        client.clear_room_if(self);
        // The leaver's own dead transport is its handler's problem.
        failed.retain(|failed_id| *failed_id != id);
        tracing::info!(
            room = %self.name,
            client_id = %id,
            members = members.len(),
            "client left"
        );

        self.reap(&mut members, failed).await;
        true
    }

    /// Hard disconnect: removes `client`, closes its transport, and tells
    /// the remaining members it is gone.
    pub async fn disconnect_client(&self, client: &Arc<Client<C>>) {
        let mut members = self.members.lock().await;
        let was_member = client
            .id()
            .is_some_and(|id| members.remove(&id).is_some());
        client.clear_room_if(self);
        client.disconnect().await;
        if !was_member {
            return;
        }
        tracing::info!(room = %self.name, client_id = ?client.id(), "client disconnected");

        let gone = disconnect_notice(client);
        let failed = deliver(&members, &gone, |_| true).await;
        self.reap(&mut members, failed).await;
    }

    /// Hard-disconnects every member.
    pub async fn disconnect_all(&self) {
        let mut members = self.members.lock().await;
        if !self.is_running() {
            return;
        }
        tracing::info!(room = %self.name, members = members.len(), "disconnecting all members");
        let everyone: Vec<ClientId> = members.keys().copied().collect();
        self.reap(&mut members, everyone).await;
    }

    /// Closes the room, migrating any remaining members into the lobby.
    ///
    /// The lobby can't be closed; the request is logged and ignored.
    pub async fn close(&self) {
        if self.lobby {
            tracing::warn!(room = %self.name, "refusing to close the lobby");
            return;
        }
        let mut members = self.members.lock().await;
        self.close_locked(&mut members).await;
    }

    // -----------------------------------------------------------------------
    // Messaging
    // -----------------------------------------------------------------------

    /// Renders `raw` and delivers it to every member that the mute policy
    /// doesn't exclude. `sender: None` is a system message and reaches
    /// everyone.
    pub async fn send_message(&self, sender: Option<&Arc<Client<C>>>, raw: &str) {
        let text = markup::render(raw);
        let msg = ServerMessage::Message {
            sender_id: sender.and_then(|s| s.id()),
            sender_name: sender.map(|s| s.name().to_string()),
            text,
        };
        self.broadcast_from(sender, &msg).await;
    }

    /// Sends `text` to the member with id `target`, answering `sender`
    /// with a notice either way.
    pub async fn send_private_message(&self, target: ClientId, text: &str, sender: &Arc<Client<C>>) {
        let mut members = self.members.lock().await;
        if !self.is_running() {
            return;
        }
        let Some(recipient) = members.get(&target).cloned() else {
            drop(members);
            sender
                .send(&ServerMessage::notice("User not found for private message."))
                .await;
            return;
        };

        if recipient.is_muted(sender.name()) {
            drop(members);
            tracing::debug!(
                room = %self.name,
                from = ?sender.id(),
                to = %target,
                "private message withheld, sender is muted"
            );
            sender
                .send(&ServerMessage::notice(format!(
                    "Private message to client ID {target} was skipped because you are muted by them."
                )))
                .await;
            return;
        }

        let Some(sender_id) = sender.id() else {
            return;
        };
        let msg = ServerMessage::PrivateMessage {
            sender_id,
            sender_name: sender.name().to_string(),
            text: markup::render(text),
        };
        let delivered = recipient.send(&msg).await;
        if !delivered {
            self.reap(&mut members, vec![target]).await;
        }
        drop(members);

        let notice = if delivered {
            format!("Private message sent to client ID {target}")
        } else {
            "User not found for private message.".to_string()
        };
        sender.send(&ServerMessage::notice(notice)).await;
    }

    // -----------------------------------------------------------------------
    // Request handlers
    // -----------------------------------------------------------------------

    /// Creates room `name` and moves `sender` into it.
    pub async fn handle_create_room(&self, sender: &Arc<Client<C>>, name: &str) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        match registry.create_room(name) {
            Ok(room) => {
                if let Err(e) = registry.join_room(room.name(), sender).await {
                    report_join_error(sender, &e).await;
                }
            }
            Err(RoomError::AlreadyExists(_)) => {
                sender
                    .send(&ServerMessage::notice(format!("Room {name} already exists")))
                    .await;
            }
            Err(e) => {
                sender.send(&ServerMessage::notice(e.to_string())).await;
            }
        }
    }

    pub async fn handle_join_room(&self, sender: &Arc<Client<C>>, name: &str) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        if let Err(e) = registry.join_room(name, sender).await {
            report_join_error(sender, &e).await;
        }
    }

    pub async fn handle_list_rooms(&self, sender: &Arc<Client<C>>, query: &str) {
        let rooms = self
            .registry
            .upgrade()
            .map(|registry| registry.list_rooms(query))
            .unwrap_or_default();
        sender.send(&ServerMessage::RoomList { rooms }).await;
    }

    /// Rolls the dice and announces the result as a system line.
    pub async fn handle_roll(&self, sender: &Arc<Client<C>>, rolls: u32, sides: u32) {
        let total = games::roll(rolls, sides);
        let dice = if rolls == 1 {
            sides.to_string()
        } else {
            format!("{rolls}d{sides}")
        };
        let line = format!(
            "<i><font color='red'>{} rolled {dice} and got {total}</font></i>",
            sender.name()
        );
        self.announce(sender, line).await;
    }

    pub async fn handle_flip(&self, sender: &Arc<Client<C>>) {
        let face = games::flip();
        let line = format!(
            "<i><font color='red'>{} flipped a coin and got {face}</font></i>",
            sender.name()
        );
        self.announce(sender, line).await;
    }

    pub async fn handle_mute(&self, sender: &Arc<Client<C>>, name: &str) {
        self.set_muted(sender, name, true).await;
    }

    pub async fn handle_unmute(&self, sender: &Arc<Client<C>>, name: &str) {
        self.set_muted(sender, name, false).await;
    }

    async fn set_muted(&self, sender: &Arc<Client<C>>, name: &str, muted: bool) {
        let name = match validate_name(name) {
            Ok(name) => name,
            Err(SessionError::InvalidName) => {
                let usage = if muted { "/mute <name>" } else { "/unmute <name>" };
                let err = CommandError::MissingArgument(usage);
                sender.send(&ServerMessage::notice(err.to_string())).await;
                return;
            }
            Err(e) => {
                sender.send(&ServerMessage::notice(e.to_string())).await;
                return;
            }
        };
        let changed = if muted {
            sender.session().mute(name)
        } else {
            sender.session().unmute(name)
        };
        if !changed {
            sender
                .send(&ServerMessage::notice(format!(
                    "User {name} not found or already in desired mute state."
                )))
                .await;
            return;
        }

        tracing::info!(
            room = %self.name,
            client_id = ?sender.id(),
            target = name,
            muted,
            "mute list changed"
        );
        if let Some(registry) = self.registry.upgrade() {
            registry.save_mutes(sender).await;
        }
        let verb = if muted { "muted" } else { "unmuted" };
        sender
            .send(&ServerMessage::notice(format!("User {name} {verb}.")))
            .await;

        let Some(sender_id) = sender.id() else {
            return;
        };
        let mut members = self.members.lock().await;
        let target = members
            .iter()
            .find(|(_, member)| member.name() == name)
            .map(|(id, member)| (*id, Arc::clone(member)));
        if let Some((target_id, target)) = target {
            let change = ServerMessage::MuteChanged {
                client_id: sender_id,
                client_name: sender.name().to_string(),
                muted,
            };
            if !target.send(&change).await {
                self.reap(&mut members, vec![target_id]).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internals (all called with the member lock held)
    // -----------------------------------------------------------------------

    /// Broadcasts a system-styled line on behalf of `actor`: no sender id
    /// on the wire, but mute suppression still treats `actor` as the
    /// sender.
    async fn announce(&self, actor: &Arc<Client<C>>, line: String) {
        let msg = ServerMessage::Message {
            sender_id: None,
            sender_name: None,
            text: line,
        };
        self.broadcast_from(Some(actor), &msg).await;
    }

    async fn broadcast_from(&self, sender: Option<&Arc<Client<C>>>, msg: &ServerMessage) {
        let mut members = self.members.lock().await;
        if !self.is_running() {
            return;
        }
        let policy = self.policy;
        let failed = deliver(&members, msg, |member| match sender {
            Some(sender) => !policy.suppresses(sender.session(), member.session()),
            None => true,
        })
        .await;
        tracing::debug!(
            room = %self.name,
            sender = ?sender.and_then(|s| s.id()),
            failed = failed.len(),
            "message delivered"
        );
        self.reap(&mut members, failed).await;
    }

    /// Evicts `failed`, then closes the room if that left it empty.
    async fn reap(&self, members: &mut Members<C>, failed: Vec<ClientId>) {
        self.evict(members, failed).await;
        self.auto_close(members).await;
    }

    /// Hard-disconnects each failed member and tells the rest. Members
    /// that fail to receive that notice join the worklist.
    async fn evict(&self, members: &mut Members<C>, mut failed: Vec<ClientId>) {
        while let Some(id) = failed.pop() {
            let Some(client) = members.remove(&id) else {
                continue;
            };
            client.clear_room_if(self);
            client.disconnect().await;
            tracing::debug!(room = %self.name, client_id = %id, "evicted client");

            let gone = disconnect_notice(&client);
            for failed_id in deliver(members, &gone, |_| true).await {
                if !failed.contains(&failed_id) {
                    failed.push(failed_id);
                }
            }
        }
    }

    async fn auto_close(&self, members: &mut Members<C>) {
        if !self.lobby && members.is_empty() {
            self.close_locked(members).await;
        }
    }

    async fn close_locked(&self, members: &mut Members<C>) {
        if self.lobby || !self.is_running() {
            return;
        }

        if !members.is_empty() {
            let notice = ServerMessage::Message {
                sender_id: None,
                sender_name: None,
                text: SHUTDOWN_NOTICE.to_string(),
            };
            let failed = deliver(members, &notice, |_| true).await;
            self.evict(members, failed).await;

            tracing::info!(room = %self.name, count = members.len(), "migrating clients to lobby");
            let migrating: Vec<Arc<Client<C>>> = members.drain().map(|(_, c)| c).collect();
            let lobby = self.registry.upgrade().map(|registry| Arc::clone(registry.lobby()));
            for client in migrating {
                client.clear_room_if(self);
                match &lobby {
                    Some(lobby) => {
                        Self::rejoin_lobby(Arc::clone(lobby), client).await;
                    }
                    None => client.disconnect().await,
                }
            }
        }

        self.running.store(false, Ordering::Release);
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_room(self);
        }
        tracing::info!(room = %self.name, "room closed");
    }

    /// Boxed so that closing a room (reached from `add_client` through
    /// eviction) can itself call `add_client` on the lobby.
    fn rejoin_lobby(lobby: Arc<Self>, client: Arc<Client<C>>) -> BoxFuture<'static, bool> {
        Box::pin(async move { lobby.add_client(client).await })
    }
}

/// Sends `msg` to every member `include` accepts and returns the ids
/// whose send failed.
async fn deliver<C, F>(members: &Members<C>, msg: &ServerMessage, mut include: F) -> Vec<ClientId>
where
    C: Connection,
    F: FnMut(&Client<C>) -> bool,
{
    let mut failed = Vec::new();
    for (id, member) in members {
        if !include(member) {
            continue;
        }
        if !member.send(msg).await {
            failed.push(*id);
        }
    }
    failed
}

fn disconnect_notice<C: Connection>(client: &Client<C>) -> ServerMessage {
    ServerMessage::Disconnect {
        client_id: client.id().unwrap_or(ClientId(0)),
        client_name: client.name().to_string(),
    }
}

async fn report_join_error<C: Connection>(sender: &Client<C>, error: &RoomError) {
    let text = match error {
        RoomError::NotFound(name) => format!("Room {name} doesn't exist"),
        // The client already landed in the lobby and saw the join.
        RoomError::NotRunning(_) => return,
        other => other.to_string(),
    };
    sender.send(&ServerMessage::notice(text)).await;
}
