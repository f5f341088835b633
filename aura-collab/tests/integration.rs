//! Integration tests for end-to-end scene synchronization.
//!
//! These tests start a real server and connect real WebSocket clients,
//! verifying the full command → sequencer → fan-out pipeline.

use aura_collab::client::{ConnectionState, SyncClient, SyncEvent};
use aura_collab::protocol::{ServerEvent, TotemId, TotemKind, TotemSpec, Vec3};
use aura_collab::server::{ServerConfig, SyncServer};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port, return the port.
async fn start_test_server(max_totems: usize) -> u16 {
    let port = free_port().await;
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        max_totems,
        broadcast_capacity: 64,
    };
    let server = SyncServer::new(config);
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

/// Connect a client, draining the initial Connected event.
async fn connect_client(url: &str) -> (SyncClient, mpsc::Receiver<SyncEvent>) {
    let mut client = SyncClient::new(url);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    match timeout(Duration::from_secs(2), events.recv()).await {
        Ok(Some(SyncEvent::Connected)) => {}
        other => panic!("Expected Connected event, got {other:?}"),
    }
    (client, events)
}

/// Wait for the next server event, panicking on timeout.
async fn next_event(events: &mut mpsc::Receiver<SyncEvent>) -> ServerEvent {
    match timeout(Duration::from_secs(2), events.recv()).await {
        Ok(Some(SyncEvent::Server(event))) => event,
        other => panic!("Expected a server event, got {other:?}"),
    }
}

/// Wait until an event matching `pred` arrives, collecting what came
/// before it.
async fn wait_for<F>(events: &mut mpsc::Receiver<SyncEvent>, mut pred: F) -> (Vec<ServerEvent>, ServerEvent)
where
    F: FnMut(&ServerEvent) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return (seen, event);
        }
        seen.push(event);
    }
}

/// Assert that no further server events arrive within a short window.
async fn assert_quiet(events: &mut mpsc::Receiver<SyncEvent>) {
    if let Ok(Some(event)) = timeout(Duration::from_millis(200), events.recv()).await {
        panic!("Expected silence, got {event:?}");
    }
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let port = start_test_server(20).await;
    let url = format!("ws://127.0.0.1:{port}");

    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_ok(), "Should connect to server");
}

#[tokio::test]
async fn test_first_joiner_gets_empty_snapshot() {
    let port = start_test_server(20).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client, mut events) = connect_client(&url).await;
    assert_eq!(client.connection_state().await, ConnectionState::Connected);

    match next_event(&mut events).await {
        ServerEvent::Init { participants, objects } => {
            assert!(participants.is_empty());
            assert!(objects.is_empty());
        }
        other => panic!("Expected Init first, got {other:?}"),
    }
}

#[tokio::test]
async fn test_second_joiner_sees_first_and_first_sees_join() {
    let port = start_test_server(20).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (_client1, mut events1) = connect_client(&url).await;
    let first_init = next_event(&mut events1).await;
    assert!(matches!(first_init, ServerEvent::Init { .. }));

    let (_client2, mut events2) = connect_client(&url).await;
    match next_event(&mut events2).await {
        ServerEvent::Init { participants, objects } => {
            assert_eq!(participants.len(), 1, "exactly the first participant");
            assert!(objects.is_empty());
        }
        other => panic!("Expected Init, got {other:?}"),
    }

    match next_event(&mut events1).await {
        ServerEvent::ParticipantJoined { .. } => {}
        other => panic!("Expected ParticipantJoined, got {other:?}"),
    }
}

#[tokio::test]
async fn test_move_is_never_echoed_to_sender() {
    let port = start_test_server(20).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client1, mut events1) = connect_client(&url).await;
    let _ = next_event(&mut events1).await; // Init

    let (_client2, mut events2) = connect_client(&url).await;
    let init2 = next_event(&mut events2).await; // Init with client1
    let mover_id = match init2 {
        ServerEvent::Init { participants, .. } => *participants.keys().next().unwrap(),
        other => panic!("Expected Init, got {other:?}"),
    };
    let _ = next_event(&mut events1).await; // ParticipantJoined for client2

    client1
        .force_move(Vec3::new(3.0, 1.0, 3.0), Vec3::new(0.0, 0.7, 0.0))
        .await
        .unwrap();

    // The other participant observes the move…
    match next_event(&mut events2).await {
        ServerEvent::ParticipantMoved { id, position, .. } => {
            assert_eq!(id, mover_id);
            assert_eq!(position, Vec3::new(3.0, 1.0, 3.0));
        }
        other => panic!("Expected ParticipantMoved, got {other:?}"),
    }

    // …and the sender never hears its own echo.
    assert_quiet(&mut events1).await;
}

#[tokio::test]
async fn test_create_broadcasts_to_everyone_including_sender() {
    let port = start_test_server(20).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client1, mut events1) = connect_client(&url).await;
    let _ = next_event(&mut events1).await;
    let (_client2, mut events2) = connect_client(&url).await;
    let _ = next_event(&mut events2).await;
    let _ = next_event(&mut events1).await; // join echo

    client1
        .create_totem(Vec3::new(0.0, 1.5, -2.0), TotemKind::Kick)
        .await
        .unwrap();

    for events in [&mut events1, &mut events2] {
        match next_event(events).await {
            ServerEvent::ObjectCreated { object } => {
                assert_eq!(object.kind, TotemKind::Kick);
                assert_eq!(object.position, Vec3::new(0.0, 1.5, -2.0));
            }
            other => panic!("Expected ObjectCreated, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_eviction_precedes_creation_for_every_observer() {
    let port = start_test_server(4).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client1, mut events1) = connect_client(&url).await;
    let _ = next_event(&mut events1).await;
    let (_client2, mut events2) = connect_client(&url).await;
    let _ = next_event(&mut events2).await;
    let _ = next_event(&mut events1).await; // join echo

    // Fill the pool: kick, hihat, bass, synth.
    let kinds = [TotemKind::Kick, TotemKind::Hihat, TotemKind::Bass, TotemKind::Synth];
    let mut created: Vec<TotemId> = Vec::new();
    for kind in kinds {
        client1.create_totem(Vec3::new(0.0, 1.5, 0.0), kind).await.unwrap();
        match next_event(&mut events1).await {
            ServerEvent::ObjectCreated { object } => created.push(object.id),
            other => panic!("Expected ObjectCreated, got {other:?}"),
        }
        let _ = next_event(&mut events2).await;
    }

    // The fifth placement displaces the kick placed first.
    client1.create_totem(Vec3::new(1.0, 1.5, 0.0), TotemKind::Synth).await.unwrap();

    for events in [&mut events1, &mut events2] {
        match next_event(events).await {
            ServerEvent::ObjectEvicted { id } => assert_eq!(id, created[0]),
            other => panic!("Eviction must arrive first, got {other:?}"),
        }
        match next_event(events).await {
            ServerEvent::ObjectCreated { object } => assert_eq!(object.kind, TotemKind::Synth),
            other => panic!("Expected ObjectCreated, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_double_remove_broadcasts_once() {
    let port = start_test_server(20).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client, mut events) = connect_client(&url).await;
    let _ = next_event(&mut events).await; // Init

    client.create_totem(Vec3::new(0.0, 1.5, 0.0), TotemKind::Bass).await.unwrap();
    let id = match next_event(&mut events).await {
        ServerEvent::ObjectCreated { object } => object.id,
        other => panic!("Expected ObjectCreated, got {other:?}"),
    };

    client.remove_totem(id).await.unwrap();
    match next_event(&mut events).await {
        ServerEvent::ObjectRemoved { id: removed } => assert_eq!(removed, id),
        other => panic!("Expected ObjectRemoved, got {other:?}"),
    }

    // Removing the same id again is a stale reference: no second
    // broadcast, no error, connection stays healthy.
    client.remove_totem(id).await.unwrap();
    assert_quiet(&mut events).await;
}

#[tokio::test]
async fn test_disconnect_broadcasts_exactly_one_left() {
    let port = start_test_server(20).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (_client1, mut events1) = connect_client(&url).await;
    let _ = next_event(&mut events1).await;

    let (client2, mut events2) = connect_client(&url).await;
    let _ = next_event(&mut events2).await;
    let joined_id = match next_event(&mut events1).await {
        ServerEvent::ParticipantJoined { participant } => participant.id,
        other => panic!("Expected ParticipantJoined, got {other:?}"),
    };

    client2.disconnect().await;

    match next_event(&mut events1).await {
        ServerEvent::ParticipantLeft { id } => assert_eq!(id, joined_id),
        other => panic!("Expected ParticipantLeft, got {other:?}"),
    }
    // Exactly one departure, and nothing further references the id.
    assert_quiet(&mut events1).await;
}

#[tokio::test]
async fn test_clear_twice_reseeds_each_time() {
    let port = start_test_server(20).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client, mut events) = connect_client(&url).await;
    let _ = next_event(&mut events).await; // Init

    client.create_totem(Vec3::new(0.0, 1.5, 0.0), TotemKind::Hihat).await.unwrap();
    let _ = next_event(&mut events).await; // ObjectCreated

    for _ in 0..2 {
        client.clear_totems().await.unwrap();
        match next_event(&mut events).await {
            ServerEvent::Init { participants, objects } => {
                assert!(objects.is_empty());
                assert!(participants.is_empty(), "solo scene: snapshot excludes self");
            }
            other => panic!("Expected fresh Init, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_replace_all_swaps_scene_atomically() {
    let port = start_test_server(20).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client1, mut events1) = connect_client(&url).await;
    let _ = next_event(&mut events1).await;
    let (_client2, mut events2) = connect_client(&url).await;
    let _ = next_event(&mut events2).await;
    let _ = next_event(&mut events1).await; // join echo

    client1.create_totem(Vec3::new(9.0, 1.5, 9.0), TotemKind::Kick).await.unwrap();
    let _ = next_event(&mut events1).await;
    let _ = next_event(&mut events2).await;

    let imported = vec![
        TotemSpec { position: Vec3::new(0.0, 1.5, -2.0), kind: TotemKind::Bass },
        TotemSpec { position: Vec3::new(2.0, 1.5, 0.0), kind: TotemKind::Synth },
    ];
    client1.replace_all(imported).await.unwrap();

    // Every participant receives one fresh snapshot holding exactly the
    // imported scene — never a partial load.
    for events in [&mut events1, &mut events2] {
        let (before, init) = wait_for(events, |e| matches!(e, ServerEvent::Init { .. })).await;
        assert!(before.is_empty(), "no per-totem events may precede the swap: {before:?}");
        match init {
            ServerEvent::Init { objects, .. } => {
                let kinds: Vec<TotemKind> = objects.iter().map(|t| t.kind).collect();
                assert_eq!(kinds, vec![TotemKind::Bass, TotemKind::Synth]);
            }
            other => panic!("Expected Init, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_malformed_frame_leaves_connection_healthy() {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    let port = start_test_server(20).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut tx, mut rx) = ws.split();

    // Init arrives first.
    let first = timeout(Duration::from_secs(2), rx.next()).await.unwrap().unwrap().unwrap();
    assert!(matches!(&first, Message::Text(t) if t.as_str().contains("\"Init\"")));

    // Garbage is dropped without killing the session…
    tx.send(Message::Text("{definitely not json".into())).await.unwrap();

    // …and a well-formed command still works afterwards.
    let create = aura_collab::protocol::ClientCommand::CreateObject {
        position: Vec3::new(0.0, 1.5, 0.0),
        kind: TotemKind::Kick,
    };
    tx.send(Message::Text(create.encode().unwrap().into())).await.unwrap();

    let next = timeout(Duration::from_secs(2), rx.next()).await.unwrap().unwrap().unwrap();
    match next {
        Message::Text(text) => {
            let event = ServerEvent::decode(text.as_str()).unwrap();
            assert!(matches!(event, ServerEvent::ObjectCreated { .. }));
        }
        other => panic!("Expected a text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rejoin_after_disconnect_gets_fresh_snapshot() {
    let port = start_test_server(20).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client, mut events) = connect_client(&url).await;
    let _ = next_event(&mut events).await; // Init
    client.create_totem(Vec3::new(0.0, 1.5, 0.0), TotemKind::Synth).await.unwrap();
    let _ = next_event(&mut events).await;

    client.disconnect().await;
    drop(events);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A reconnect is a brand-new participant with a full snapshot.
    let (_client, mut events) = connect_client(&url).await;
    match next_event(&mut events).await {
        ServerEvent::Init { participants, objects } => {
            assert!(participants.is_empty());
            assert_eq!(objects.len(), 1);
            assert_eq!(objects[0].kind, TotemKind::Synth);
        }
        other => panic!("Expected Init, got {other:?}"),
    }
}

/// Ids referenced by events must never name a departed participant.
#[tokio::test]
async fn test_no_events_reference_departed_participant() {
    let port = start_test_server(20).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (_client1, mut events1) = connect_client(&url).await;
    let _ = next_event(&mut events1).await;

    let (client2, mut events2) = connect_client(&url).await;
    let _ = next_event(&mut events2).await;
    let departed = match next_event(&mut events1).await {
        ServerEvent::ParticipantJoined { participant } => participant.id,
        other => panic!("Expected ParticipantJoined, got {other:?}"),
    };

    client2.disconnect().await;
    drop(events2);
    let _ = wait_for(&mut events1, |e| matches!(e, ServerEvent::ParticipantLeft { .. })).await;

    // A third joiner's snapshot no longer contains the departed id.
    let (_client3, mut events3) = connect_client(&url).await;
    match next_event(&mut events3).await {
        ServerEvent::Init { participants, .. } => {
            assert_eq!(participants.len(), 1);
            assert!(!participants.contains_key(&departed));
        }
        other => panic!("Expected Init, got {other:?}"),
    }
}
