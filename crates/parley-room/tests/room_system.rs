//! Integration tests for rooms and the registry, driven through
//! in-memory connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parley_protocol::{ClientId, Envelope, ServerMessage};
use parley_room::{Client, LOBBY, Registry, RoomError, SHUTDOWN_NOTICE};
use parley_session::{MemoryMuteStore, MutePolicy, MuteStore, SessionState};
use parley_transport::{ConnectionId, MemoryConnection, MemoryPeer};

type TestRegistry = Registry<MemoryConnection>;

// =========================================================================
// Helpers
// =========================================================================

static NEXT_CONN: AtomicU64 = AtomicU64::new(1);

struct TestClient {
    client: Arc<Client<MemoryConnection>>,
    peer: MemoryPeer,
}

impl TestClient {
    fn id(&self) -> ClientId {
        self.client.id().unwrap()
    }

    /// Everything the server has sent so far.
    async fn drain(&self) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Some(frame) = self.peer.try_recv().await {
            let envelope: Envelope<ServerMessage> = serde_json::from_slice(&frame).unwrap();
            out.push(envelope.payload);
        }
        out
    }

    async fn texts(&self) -> Vec<String> {
        self.drain()
            .await
            .into_iter()
            .filter_map(|msg| match msg {
                ServerMessage::Message { text, .. } | ServerMessage::Notice { text } => Some(text),
                _ => None,
            })
            .collect()
    }
}

fn registry() -> Arc<TestRegistry> {
    Registry::new(Arc::new(MemoryMuteStore::new()), MutePolicy::Bidirectional)
}

/// Opens a connection, identifies as `name`, and joins the lobby.
async fn connect(registry: &TestRegistry, name: &str) -> TestClient {
    let id = ConnectionId::new(NEXT_CONN.fetch_add(1, Ordering::Relaxed));
    let (conn, peer) = MemoryConnection::pair(id);
    let client = Arc::new(Client::new(conn));
    registry.identify(&client, name).await.unwrap();
    registry.join_lobby(&client).await.unwrap();
    TestClient { client, peer }
}

/// Number of open rooms that list `id` as a member.
async fn rooms_containing(registry: &TestRegistry, id: ClientId) -> usize {
    let mut count = 0;
    for name in registry.list_rooms("") {
        if let Some(room) = registry.find_room(&name) {
            if room.contains(id).await {
                count += 1;
            }
        }
    }
    count
}

// =========================================================================
// Joining and syncing
// =========================================================================

#[tokio::test]
async fn test_join_announces_and_syncs_existing_members() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    assert_eq!(
        alice.drain().await,
        vec![ServerMessage::RoomAction {
            client_id: alice.id(),
            client_name: "Alice".into(),
            room: LOBBY.into(),
            joined: true,
        }]
    );

    let bob = connect(&registry, "Bob").await;
    let bob_joined = ServerMessage::RoomAction {
        client_id: bob.id(),
        client_name: "Bob".into(),
        room: LOBBY.into(),
        joined: true,
    };
    assert_eq!(alice.drain().await, vec![bob_joined.clone()]);
    assert_eq!(
        bob.drain().await,
        vec![
            bob_joined,
            ServerMessage::SyncClient {
                client_id: alice.id(),
                client_name: "Alice".into(),
            },
        ]
    );
    assert_eq!(bob.client.state(), SessionState::Joined);
}

#[tokio::test]
async fn test_identify_assigns_increasing_ids() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    let bob = connect(&registry, "Bob").await;
    assert!(bob.id() > alice.id());

    let again = registry.identify(&alice.client, "Alicia").await;
    assert!(again.is_err());
    assert_eq!(alice.client.name(), "Alice");
}

#[tokio::test]
async fn test_unidentified_client_cannot_join() {
    let registry = registry();
    let (conn, _peer) = MemoryConnection::pair(ConnectionId::new(9_999));
    let client = Arc::new(Client::new(conn));

    let result = registry.join_lobby(&client).await;
    assert!(matches!(result, Err(RoomError::Unidentified)));
    assert_eq!(registry.lobby().member_count().await, 0);
}

// =========================================================================
// Membership exclusivity
// =========================================================================

#[tokio::test]
async fn test_client_is_in_exactly_one_room() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    registry.create_room("games").unwrap();
    registry.create_room("music").unwrap();
    // Keep both rooms open while Alice moves around.
    let carol = connect(&registry, "Carol").await;
    registry.join_room("games", &carol.client).await.unwrap();
    let dave = connect(&registry, "Dave").await;
    registry.join_room("music", &dave.client).await.unwrap();

    for target in ["games", "music", LOBBY, "Games", "lobby", "MUSIC"] {
        registry.join_room(target, &alice.client).await.unwrap();
        assert_eq!(
            rooms_containing(&registry, alice.id()).await,
            1,
            "after joining {target}"
        );
        let current = alice.client.current_room().unwrap();
        assert!(current.name().eq_ignore_ascii_case(target));
    }
}

#[tokio::test]
async fn test_moving_rooms_sends_leave_then_join() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    registry.create_room("games").unwrap();
    alice.drain().await;

    registry.join_room("games", &alice.client).await.unwrap();
    let msgs = alice.drain().await;
    assert!(matches!(
        &msgs[..],
        [
            ServerMessage::RoomAction { room: left, joined: false, .. },
            ServerMessage::RoomAction { room: joined_room, joined: true, .. },
        ] if left == LOBBY && joined_room == "games"
    ));
}

#[tokio::test]
async fn test_join_current_room_is_silent_noop() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    alice.drain().await;

    registry.join_room("LOBBY", &alice.client).await.unwrap();
    assert!(alice.drain().await.is_empty());
    assert_eq!(registry.lobby().member_count().await, 1);
}

#[tokio::test]
async fn test_join_missing_room_changes_nothing() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    alice.drain().await;

    let result = registry.join_room("nowhere", &alice.client).await;
    assert!(matches!(result, Err(RoomError::NotFound(name)) if name == "nowhere"));
    assert!(registry.lobby().contains(alice.id()).await);
    assert!(alice.drain().await.is_empty());
}

// =========================================================================
// Registry bookkeeping
// =========================================================================

#[tokio::test]
async fn test_create_room_rejects_duplicates_ignoring_case() {
    let registry = registry();
    registry.create_room("Games").unwrap();

    assert!(matches!(
        registry.create_room("gAmEs"),
        Err(RoomError::AlreadyExists(_))
    ));
    assert!(matches!(registry.create_room("   "), Err(RoomError::InvalidName)));
    assert!(matches!(
        registry.create_room("Lobby"),
        Err(RoomError::AlreadyExists(_))
    ));
    assert_eq!(registry.room_count(), 2);
}

#[tokio::test]
async fn test_list_rooms_filters_and_sorts() {
    let registry = registry();
    for name in ["Zebra", "games", "Board Games", "music"] {
        registry.create_room(name).unwrap();
    }

    assert_eq!(
        registry.list_rooms(""),
        vec!["Board Games", "games", "lobby", "music", "Zebra"]
    );
    assert_eq!(registry.list_rooms("GAME"), vec!["Board Games", "games"]);
    assert!(registry.list_rooms("jazz").is_empty());
}

#[tokio::test]
async fn test_remove_room_checks_identity() {
    let registry = registry();
    let old = registry.create_room("a").unwrap();
    old.close().await;
    assert!(registry.find_room("a").is_none());

    let newer = registry.create_room("a").unwrap();
    assert!(!registry.remove_room(&old));
    let found = registry.find_room("A").unwrap();
    assert!(Arc::ptr_eq(&found, &newer));
}

// =========================================================================
// Lobby permanence
// =========================================================================

#[tokio::test]
async fn test_lobby_survives_everything() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;

    registry.lobby().close().await;
    assert!(registry.lobby().is_running());
    assert!(!registry.remove_room(registry.lobby()));

    registry.disconnect(&alice.client).await;
    assert_eq!(registry.lobby().member_count().await, 0);
    assert!(registry.lobby().is_running());
    assert!(registry.find_room(LOBBY).is_some());
}

// =========================================================================
// Broadcast and eviction
// =========================================================================

#[tokio::test]
async fn test_dead_member_is_evicted_during_broadcast() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    let bob = connect(&registry, "Bob").await;
    let carol = connect(&registry, "Carol").await;
    alice.drain().await;
    bob.drain().await;

    let TestClient {
        client: carol_client,
        peer: carol_peer,
    } = carol;
    let carol_id = carol_client.id().unwrap();
    drop(carol_peer);

    registry
        .lobby()
        .send_message(Some(&alice.client), "hello")
        .await;

    let carol_gone = ServerMessage::Disconnect {
        client_id: carol_id,
        client_name: "Carol".into(),
    };
    for live in [&alice, &bob] {
        let msgs = live.drain().await;
        assert_eq!(msgs.len(), 2, "message then disconnect notice: {msgs:?}");
        assert!(matches!(&msgs[0], ServerMessage::Message { text, .. } if text == "hello"));
        assert_eq!(msgs[1], carol_gone);
    }
    assert_eq!(
        registry.lobby().member_ids().await,
        vec![alice.id(), bob.id()]
    );
    assert_eq!(carol_client.state(), SessionState::Closed);
    assert!(carol_client.current_room().is_none());
}

#[tokio::test]
async fn test_eviction_cascades_through_notices() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    let bob = connect(&registry, "Bob").await;
    let carol = connect(&registry, "Carol").await;
    alice.drain().await;

    drop(bob.peer);
    drop(carol.peer);
    registry
        .lobby()
        .send_message(Some(&alice.client), "anyone?")
        .await;

    assert_eq!(registry.lobby().member_ids().await, vec![alice.id()]);
    let gone: Vec<ClientId> = alice
        .drain()
        .await
        .into_iter()
        .filter_map(|msg| match msg {
            ServerMessage::Disconnect { client_id, .. } => Some(client_id),
            _ => None,
        })
        .collect();
    assert_eq!(gone.len(), 2);
    assert!(gone.contains(&bob.client.id().unwrap()));
    assert!(gone.contains(&carol.client.id().unwrap()));
}

#[tokio::test]
async fn test_markup_is_rendered_on_broadcast() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    alice.drain().await;

    registry
        .lobby()
        .send_message(Some(&alice.client), "**hi** #r red#")
        .await;
    assert_eq!(
        alice.drain().await,
        vec![ServerMessage::Message {
            sender_id: Some(alice.id()),
            sender_name: Some("Alice".into()),
            text: "<b>hi</b> <span style=\"color:red\">red</span>".into(),
        }]
    );
}

// =========================================================================
// Mute policy
// =========================================================================

#[tokio::test]
async fn test_bidirectional_mute_blocks_both_directions() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    let bob = connect(&registry, "Bob").await;
    bob.client.session().mute("Alice");
    alice.drain().await;
    bob.drain().await;

    let lobby = registry.lobby();
    lobby.send_message(Some(&alice.client), "from alice").await;
    lobby.send_message(Some(&bob.client), "from bob").await;
    lobby.send_message(None, "system").await;

    assert_eq!(alice.texts().await, vec!["from alice", "system"]);
    assert_eq!(bob.texts().await, vec!["from bob", "system"]);
}

#[tokio::test]
async fn test_recipient_only_mute_blocks_one_direction() {
    let registry: Arc<TestRegistry> =
        Registry::new(Arc::new(MemoryMuteStore::new()), MutePolicy::RecipientOnly);
    let alice = connect(&registry, "Alice").await;
    let bob = connect(&registry, "Bob").await;
    bob.client.session().mute("Alice");
    alice.drain().await;
    bob.drain().await;

    let lobby = registry.lobby();
    lobby.send_message(Some(&alice.client), "from alice").await;
    lobby.send_message(Some(&bob.client), "from bob").await;

    assert_eq!(alice.texts().await, vec!["from alice", "from bob"]);
    assert_eq!(bob.texts().await, vec!["from bob"]);
}

#[tokio::test]
async fn test_mute_handler_persists_and_notifies_target() {
    let store = Arc::new(MemoryMuteStore::new());
    let registry: Arc<TestRegistry> = Registry::new(store.clone(), MutePolicy::Bidirectional);
    let alice = connect(&registry, "Alice").await;
    let bob = connect(&registry, "Bob").await;
    alice.drain().await;
    bob.drain().await;

    let lobby = registry.lobby();
    lobby.handle_mute(&bob.client, "Alice").await;
    assert_eq!(bob.texts().await, vec!["User Alice muted."]);
    assert_eq!(
        alice.drain().await,
        vec![ServerMessage::MuteChanged {
            client_id: bob.id(),
            client_name: "Bob".into(),
            muted: true,
        }]
    );
    assert_eq!(store.load_mutes("Bob").await.unwrap(), vec!["Alice"]);

    lobby.handle_mute(&bob.client, "Alice").await;
    assert_eq!(
        bob.texts().await,
        vec!["User Alice not found or already in desired mute state."]
    );

    lobby.handle_unmute(&bob.client, "Alice").await;
    assert_eq!(bob.texts().await, vec!["User Alice unmuted."]);
    assert!(store.load_mutes("Bob").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_identify_restores_saved_mutes() {
    let store = Arc::new(MemoryMuteStore::new());
    store
        .save_mutes("Bob", &["Alice".to_string()])
        .await
        .unwrap();
    let registry: Arc<TestRegistry> = Registry::new(store, MutePolicy::Bidirectional);

    let bob = connect(&registry, "Bob").await;
    assert!(bob.client.is_muted("Alice"));
}

#[tokio::test]
async fn test_unmute_restores_delivery() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    let bob = connect(&registry, "Bob").await;
    let lobby = registry.lobby();
    lobby.handle_mute(&bob.client, "Alice").await;
    alice.drain().await;
    bob.drain().await;

    lobby.send_message(Some(&alice.client), "hidden").await;
    assert!(bob.texts().await.is_empty());

    lobby.handle_unmute(&bob.client, "Alice").await;
    assert_eq!(bob.texts().await, vec!["User Alice unmuted."]);
    alice.drain().await;

    lobby.send_message(Some(&alice.client), "back").await;
    lobby.send_message(Some(&bob.client), "welcome back").await;
    assert_eq!(bob.texts().await, vec!["back", "welcome back"]);
    assert_eq!(alice.texts().await, vec!["back", "welcome back"]);
}

#[tokio::test]
async fn test_blank_mute_target_gets_usage_notice() {
    let store = Arc::new(MemoryMuteStore::new());
    let registry: Arc<TestRegistry> = Registry::new(store.clone(), MutePolicy::Bidirectional);
    let alice = connect(&registry, "Alice").await;
    let bob = connect(&registry, "Bob").await;
    alice.drain().await;
    bob.drain().await;

    let lobby = registry.lobby();
    lobby.handle_mute(&bob.client, "   ").await;
    assert_eq!(bob.texts().await, vec!["usage: /mute <name>"]);
    lobby.handle_unmute(&bob.client, "").await;
    assert_eq!(bob.texts().await, vec!["usage: /unmute <name>"]);
    lobby.handle_mute(&bob.client, "Al\nice").await;
    assert_eq!(
        bob.texts().await,
        vec!["display name must not contain control characters"]
    );

    assert!(!bob.client.is_muted(""));
    assert!(!bob.client.is_muted("Al\nice"));
    assert!(store.load_mutes("Bob").await.unwrap().is_empty());
    assert!(alice.drain().await.is_empty());
}

// =========================================================================
// Private messages
// =========================================================================

#[tokio::test]
async fn test_private_message_outcomes() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    let bob = connect(&registry, "Bob").await;
    alice.drain().await;
    bob.drain().await;
    let lobby = registry.lobby();

    lobby
        .send_private_message(bob.id(), "psst", &alice.client)
        .await;
    assert_eq!(
        bob.drain().await,
        vec![ServerMessage::PrivateMessage {
            sender_id: alice.id(),
            sender_name: "Alice".into(),
            text: "psst".into(),
        }]
    );
    assert_eq!(
        alice.texts().await,
        vec![format!("Private message sent to client ID {}", bob.id())]
    );

    lobby
        .send_private_message(ClientId(999), "hello?", &alice.client)
        .await;
    assert_eq!(alice.texts().await, vec!["User not found for private message."]);

    bob.client.session().mute("Alice");
    lobby
        .send_private_message(bob.id(), "psst", &alice.client)
        .await;
    assert!(bob.drain().await.is_empty());
    assert_eq!(
        alice.texts().await,
        vec![format!(
            "Private message to client ID {} was skipped because you are muted by them.",
            bob.id()
        )]
    );
}

#[tokio::test]
async fn test_private_message_only_reaches_same_room() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    let bob = connect(&registry, "Bob").await;
    registry.create_room("games").unwrap();
    registry.join_room("games", &bob.client).await.unwrap();
    alice.drain().await;
    bob.drain().await;

    registry
        .lobby()
        .send_private_message(bob.id(), "psst", &alice.client)
        .await;
    assert!(bob.drain().await.is_empty());
    assert_eq!(alice.texts().await, vec!["User not found for private message."]);
}

// =========================================================================
// Games
// =========================================================================

#[tokio::test]
async fn test_roll_announces_total_as_system_line() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    let bob = connect(&registry, "Bob").await;
    alice.drain().await;
    bob.drain().await;

    registry.lobby().handle_roll(&alice.client, 2, 6).await;

    for live in [&alice, &bob] {
        let msgs = live.drain().await;
        let [ServerMessage::Message { sender_id, text, .. }] = &msgs[..] else {
            panic!("expected one message, got {msgs:?}");
        };
        assert_eq!(*sender_id, None);
        let total: u64 = text
            .strip_prefix("<i><font color='red'>Alice rolled 2d6 and got ")
            .and_then(|rest| rest.strip_suffix("</font></i>"))
            .unwrap()
            .parse()
            .unwrap();
        assert!((2..=12).contains(&total));
    }
}

#[tokio::test]
async fn test_single_die_and_flip_lines() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    alice.drain().await;
    let lobby = registry.lobby();

    lobby.handle_roll(&alice.client, 1, 20).await;
    lobby.handle_flip(&alice.client).await;

    let texts = alice.texts().await;
    assert!(texts[0].starts_with("<i><font color='red'>Alice rolled 20 and got "));
    assert!(
        texts[1] == "<i><font color='red'>Alice flipped a coin and got heads</font></i>"
            || texts[1] == "<i><font color='red'>Alice flipped a coin and got tails</font></i>"
    );
}

#[tokio::test]
async fn test_roll_respects_mutes_against_actor() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    let bob = connect(&registry, "Bob").await;
    bob.client.session().mute("Alice");
    bob.drain().await;

    registry.lobby().handle_flip(&alice.client).await;
    assert!(bob.drain().await.is_empty());
}

// =========================================================================
// Auto-close and migration
// =========================================================================

#[tokio::test]
async fn test_room_closes_when_last_member_leaves() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    let bob = connect(&registry, "Bob").await;
    let games = registry.create_room("games").unwrap();
    registry.join_room("games", &alice.client).await.unwrap();
    registry.join_room("games", &bob.client).await.unwrap();

    registry.join_lobby(&alice.client).await.unwrap();
    assert!(games.is_running());

    registry.disconnect(&bob.client).await;
    assert!(!games.is_running());
    assert!(registry.find_room("games").is_none());
    assert_eq!(registry.room_count(), 1);
}

#[tokio::test]
async fn test_graceful_leave_of_last_member_closes_room() {
    let registry = registry();
    let kim = connect(&registry, "Kim").await;
    let games = registry.create_room("games").unwrap();
    registry.join_room("games", &kim.client).await.unwrap();
    assert_eq!(registry.list_rooms(""), vec!["games", LOBBY]);

    assert!(games.remove_client(&kim.client).await);
    assert!(!games.is_running());
    assert_eq!(registry.list_rooms(""), vec![LOBBY]);
    assert!(registry.find_room("games").is_none());
    assert!(kim.client.is_alive());
}

#[tokio::test]
async fn test_close_migrates_members_to_lobby() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    let bob = connect(&registry, "Bob").await;
    let games = registry.create_room("games").unwrap();
    registry.join_room("games", &alice.client).await.unwrap();
    registry.join_room("games", &bob.client).await.unwrap();
    alice.drain().await;
    bob.drain().await;

    games.close().await;

    assert!(!games.is_running());
    assert!(registry.find_room("games").is_none());
    assert_eq!(
        registry.lobby().member_ids().await,
        vec![alice.id(), bob.id()]
    );
    for member in [&alice, &bob] {
        let texts = member.texts().await;
        assert_eq!(texts.first().map(String::as_str), Some(SHUTDOWN_NOTICE));
        let current = member.client.current_room().unwrap();
        assert!(current.is_lobby());
    }
}

#[tokio::test]
async fn test_create_room_handler_moves_sender() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    alice.drain().await;
    let lobby = Arc::clone(registry.lobby());

    lobby.handle_create_room(&alice.client, "Games").await;
    assert_eq!(alice.client.current_room().unwrap().name(), "Games");

    let games = alice.client.current_room().unwrap();
    games.handle_create_room(&alice.client, "games").await;
    assert!(alice.texts().await.contains(&"Room games already exists".to_string()));

    games.handle_join_room(&alice.client, "nowhere").await;
    assert_eq!(alice.texts().await, vec!["Room nowhere doesn't exist"]);

    games.handle_list_rooms(&alice.client, "").await;
    assert_eq!(
        alice.drain().await,
        vec![ServerMessage::RoomList {
            rooms: vec!["Games".into(), "lobby".into()]
        }]
    );
}

// =========================================================================
// Teardown
// =========================================================================

#[tokio::test]
async fn test_disconnect_notifies_room_and_closes_transport() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    let bob = connect(&registry, "Bob").await;
    alice.drain().await;
    bob.drain().await;

    registry.disconnect(&bob.client).await;

    assert_eq!(
        alice.drain().await,
        vec![ServerMessage::Disconnect {
            client_id: bob.id(),
            client_name: "Bob".into(),
        }]
    );
    assert!(bob.peer.recv().await.is_none());
    assert_eq!(bob.client.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_shutdown_disconnects_everyone() {
    let registry = registry();
    let alice = connect(&registry, "Alice").await;
    let bob = connect(&registry, "Bob").await;
    let games = registry.create_room("games").unwrap();
    registry.join_room("games", &bob.client).await.unwrap();

    registry.shutdown().await;

    assert!(!alice.client.is_alive());
    assert!(!bob.client.is_alive());
    assert!(!games.is_running());
    assert_eq!(registry.lobby().member_count().await, 0);
    assert_eq!(registry.room_count(), 1);
}
