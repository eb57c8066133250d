//! The registry: every open room, plus identity and mute bookkeeping.
//!
//! One registry is created per server and shared by `Arc`. It always
//! contains the lobby; other rooms come and go. Rooms hold a `Weak`
//! back-pointer so that closing a room can unregister itself and
//! migrate its members.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parley_session::{IdAllocator, Identity, MutePolicy, MuteStore, SessionError, validate_name};
use parley_transport::Connection;

use crate::{Client, Room, RoomError};

/// Name of the permanent default room.
pub const LOBBY: &str = "lobby";

pub struct Registry<C: Connection> {
    /// Open rooms keyed by lowercased name.
    rooms: DashMap<String, Arc<Room<C>>>,
    lobby: Arc<Room<C>>,
    ids: IdAllocator,
    store: Arc<dyn MuteStore>,
    policy: MutePolicy,
    this: Weak<Registry<C>>,
}

impl<C: Connection> Registry<C> {
    /// Creates a registry containing only the lobby.
    pub fn new(store: Arc<dyn MuteStore>, policy: MutePolicy) -> Arc<Self> {
        Arc::new_cyclic(|this| {
            let lobby = Arc::new(Room::new(LOBBY, true, policy, this.clone()));
            let rooms = DashMap::new();
            rooms.insert(LOBBY.to_string(), Arc::clone(&lobby));
            Self {
                rooms,
                lobby,
                ids: IdAllocator::new(),
                store,
                policy,
                this: this.clone(),
            }
        })
    }

    pub fn lobby(&self) -> &Arc<Room<C>> {
        &self.lobby
    }

    pub fn policy(&self) -> MutePolicy {
        self.policy
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Looks a room up by name, ignoring case.
    pub fn find_room(&self, name: &str) -> Option<Arc<Room<C>>> {
        self.rooms
            .get(&room_key(name))
            .map(|room| Arc::clone(room.value()))
    }

    // -----------------------------------------------------------------------
    // Room lifecycle
    // -----------------------------------------------------------------------

    /// Creates an empty room.
    ///
    /// # Errors
    /// - [`RoomError::InvalidName`] if `name` is blank
    /// - [`RoomError::AlreadyExists`] if a room with that name exists,
    ///   ignoring case
    pub fn create_room(&self, name: &str) -> Result<Arc<Room<C>>, RoomError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RoomError::InvalidName);
        }
        match self.rooms.entry(room_key(name)) {
            Entry::Occupied(_) => Err(RoomError::AlreadyExists(name.to_string())),
            Entry::Vacant(slot) => {
                let room = Arc::new(Room::new(name, false, self.policy, self.this.clone()));
                slot.insert(Arc::clone(&room));
                tracing::info!(room = name, "room created");
                Ok(room)
            }
        }
    }

    /// Unregisters `room`. Only removes the exact instance given, so a
    /// newer room that reused the name is left alone. The lobby is never
    /// removed.
    pub fn remove_room(&self, room: &Room<C>) -> bool {
        if room.is_lobby() {
            return false;
        }
        let removed = self
            .rooms
            .remove_if(&room_key(room.name()), |_, existing| {
                std::ptr::eq(Arc::as_ptr(existing), room)
            })
            .is_some();
        if removed {
            tracing::info!(room = room.name(), "room removed");
        }
        removed
    }

    /// Names of rooms containing `query` (ignoring case), sorted. An empty
    /// query lists every room.
    pub fn list_rooms(&self, query: &str) -> Vec<String> {
        let query = query.trim().to_lowercase();
        let mut names: Vec<String> = self
            .rooms
            .iter()
            .filter(|entry| entry.key().contains(&query))
            .map(|entry| entry.value().name().to_string())
            .collect();
        names.sort_by_key(|name| name.to_lowercase());
        names
    }

    // -----------------------------------------------------------------------
    // Clients
    // -----------------------------------------------------------------------

    /// Assigns `client` an id and display name and loads its mute list.
    ///
    /// A mute list that fails to load is logged and treated as empty.
    ///
    /// # Errors
    /// - [`SessionError::InvalidName`] or
    ///   [`SessionError::ControlCharacters`] if `name` is unusable
    /// - [`SessionError::AlreadyIdentified`] on a second call
    pub async fn identify(&self, client: &Client<C>, name: &str) -> Result<Identity, SessionError> {
        let session = client.session();
        if let Some(id) = session.id() {
            return Err(SessionError::AlreadyIdentified(id));
        }
        let name = validate_name(name)?;
        let identity = session.identify(self.ids.next_id(), name)?.clone();

        match self.store.load_mutes(&identity.name).await {
            Ok(muted) => session.replace_mutes(muted),
            Err(e) => {
                tracing::warn!(client_id = %identity.id, error = %e, "failed to load mute list");
            }
        }
        tracing::info!(client_id = %identity.id, name = %identity.name, "client identified");
        Ok(identity)
    }

    /// Persists `client`'s current mute list. Failures are logged.
    pub async fn save_mutes(&self, client: &Client<C>) {
        let muted = client.session().muted_names();
        if let Err(e) = self.store.save_mutes(client.name(), &muted).await {
            tracing::warn!(client_id = ?client.id(), error = %e, "failed to save mute list");
        }
    }

    pub async fn join_lobby(&self, client: &Arc<Client<C>>) -> Result<(), RoomError> {
        self.join_room(LOBBY, client).await
    }

    /// Moves `client` out of its current room and into `name`.
    ///
    /// Joining the room the client is already in does nothing.
    ///
    /// # Errors
    /// - [`RoomError::NotFound`] if no such room exists; nothing changes
    /// - [`RoomError::NotRunning`] if the room closed before the client
    ///   got in; the client is placed in the lobby instead
    /// - [`RoomError::Unidentified`] if the client has no identity yet
    pub async fn join_room(&self, name: &str, client: &Arc<Client<C>>) -> Result<(), RoomError> {
        if client.id().is_none() {
            return Err(RoomError::Unidentified);
        }
        let target = self
            .find_room(name)
            .ok_or_else(|| RoomError::NotFound(name.trim().to_string()))?;

        self.leave_current(client, &target).await;
        if client
            .current_room()
            .is_some_and(|current| Arc::ptr_eq(&current, &target))
        {
            return Ok(());
        }

        if target.add_client(Arc::clone(client)).await {
            return Ok(());
        }
        tracing::debug!(
            room = target.name(),
            client_id = ?client.id(),
            "target room closed before join, falling back to lobby"
        );
        self.lobby.add_client(Arc::clone(client)).await;
        Err(RoomError::NotRunning(target.name().to_string()))
    }

    /// Tears `client` down: leaves its room with a disconnect notice to
    /// the others and closes its transport.
    pub async fn disconnect(&self, client: &Arc<Client<C>>) {
        loop {
            let Some(room) = client.current_room() else {
                break;
            };
            room.disconnect_client(client).await;
            // A concurrent close may have moved the client to the lobby
            // while we waited for the old room's lock.
            if client
                .current_room()
                .is_none_or(|now| Arc::ptr_eq(&now, &room))
            {
                break;
            }
        }
        client.disconnect().await;
    }

    /// Disconnects every client in every room. Used at server shutdown.
    pub async fn shutdown(&self) {
        let rooms: Vec<Arc<Room<C>>> = self
            .rooms
            .iter()
            .filter(|entry| !entry.value().is_lobby())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        tracing::info!(rooms = rooms.len() + 1, "shutting down all rooms");
        for room in rooms {
            room.disconnect_all().await;
        }
        self.lobby.disconnect_all().await;
    }

    /// Removes `client` from its current room, following it if a close
    /// migrates it elsewhere mid-removal. Stops early if it is already in
    /// `stay_in`.
    async fn leave_current(&self, client: &Arc<Client<C>>, stay_in: &Arc<Room<C>>) {
        loop {
            let Some(current) = client.current_room() else {
                return;
            };
            if Arc::ptr_eq(&current, stay_in) {
                return;
            }
            if current.remove_client(client).await {
                return;
            }
            let moved = client
                .current_room()
                .is_some_and(|now| !Arc::ptr_eq(&now, &current));
            if !moved {
                return;
            }
        }
    }
}

fn room_key(name: &str) -> String {
    name.trim().to_lowercase()
}
