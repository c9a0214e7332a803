//! End-to-end hub scenarios over in-memory wire pairs.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use ws_hub::wire::{self, Peer};
use ws_hub::{Hub, HubConfig};

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

/// Route test logs through the usual subscriber; `RUST_LOG` controls
/// verbosity.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Connect a peer and consume the client id announcement.
async fn join(hub: &Hub, port: u16) -> (Uuid, Peer) {
    init_tracing();
    let (hub_wire, mut peer) = wire::pair(32);
    let uid = hub.connect(hub_wire, addr(port)).unwrap();

    let announcement = peer.recv_json().await.unwrap();
    assert_eq!(announcement["event_type"], "client_id");
    assert_eq!(announcement["client_id"], uid.to_string());

    (uid, peer)
}

/// Send `set_client_info` and return the reply.
async fn identify(peer: &mut Peer, id: i64, name: &str, client_type: &str) -> serde_json::Value {
    peer.send_json(&json!({
        "id": id,
        "type": "set_client_info",
        "data": {"name": name, "type": client_type},
    }))
    .await;
    peer.recv_json().await.unwrap()
}

/// Wait for the registry to settle at the given presence count; teardown
/// runs on background tasks.
async fn wait_for_count(hub: &Hub, count: usize) {
    for _ in 0..200 {
        if hub.registry().connected_count().await == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("registry never reached {count} clients");
}

#[tokio::test]
async fn identity_flow_with_name_conflict() {
    let hub = Hub::new(HubConfig::default());
    let (uid_a, mut a) = join(&hub, 4010).await;
    let (_uid_b, mut b) = join(&hub, 4011).await;

    let reply_a = identify(&mut a, 1, "Bob", "controller").await;
    assert_eq!(reply_a["event_type"], "client_info_updated");
    assert_eq!(reply_a["client_id"], uid_a.to_string());
    assert_eq!(reply_a["name"], "Bob");
    assert_eq!(reply_a["type"], "controller");
    assert_eq!(reply_a["name_conflict"], false);

    let reply_b = identify(&mut b, 1, "Bob", "visualiser").await;
    assert_eq!(reply_b["name"], "Bob (2)");
    assert_eq!(reply_b["name_conflict"], true);
}

#[tokio::test]
async fn update_rejects_taken_name_keeps_old_identity() {
    let hub = Hub::new(HubConfig::default());
    let (_uid_a, mut a) = join(&hub, 4020).await;
    let (uid_b, mut b) = join(&hub, 4021).await;

    identify(&mut a, 1, "Alice", "controller").await;
    identify(&mut b, 1, "Bob", "mobile").await;

    b.send_json(&json!({
        "id": 2,
        "type": "update_client_info",
        "data": {"name": "Alice"},
    }))
    .await;
    let reply = b.recv_json().await.unwrap();
    assert_eq!(reply["success"], false);
    assert_eq!(
        reply["error"]["message"],
        "Name 'Alice' is already taken by another client"
    );

    let snapshot = hub.registry().snapshot().await;
    assert_eq!(snapshot[&uid_b].name, "Bob");
}

#[tokio::test]
async fn update_without_fields_is_rejected() {
    let hub = Hub::new(HubConfig::default());
    let (_uid, mut peer) = join(&hub, 4025).await;

    peer.send_json(&json!({"id": 3, "type": "update_client_info", "data": {}}))
        .await;
    let reply = peer.recv_json().await.unwrap();
    assert_eq!(reply["success"], false);
    assert_eq!(reply["error"]["message"], "No valid updates provided");
}

#[tokio::test]
async fn broadcast_reaches_targets_only() {
    let hub = Hub::new(HubConfig::default());
    let (_uid_a, mut a) = join(&hub, 4030).await;
    let (uid_b, mut b) = join(&hub, 4031).await;
    let (_uid_c, mut c) = join(&hub, 4032).await;

    identify(&mut a, 1, "Sender", "controller").await;
    identify(&mut b, 1, "Target", "visualiser").await;
    identify(&mut c, 1, "Bystander", "visualiser").await;

    // Both observers subscribe to broadcasts. The follow-up identify reply
    // proves the subscription is live: messages dispatch in arrival order.
    for (peer, name) in [(&mut b, "Target"), (&mut c, "Bystander")] {
        peer.send_json(
            &json!({"id": 50, "type": "subscribe_event", "event_type": "client_broadcast"}),
        )
        .await;
        identify(peer, 2, name, "visualiser").await;
    }

    a.send_json(&json!({
        "id": 7,
        "type": "broadcast",
        "data": {
            "broadcast_type": "custom",
            "target": {"mode": "names", "names": ["Target"]},
            "payload": {"x": 1},
        },
    }))
    .await;

    let receipt = a.recv_json().await.unwrap();
    assert_eq!(receipt["id"], 7);
    assert_eq!(receipt["event_type"], "broadcast_sent");
    assert_eq!(receipt["targets_matched"], 1);
    assert_eq!(receipt["target_uuids"][0], uid_b.to_string());

    let delivered = b.recv_json().await.unwrap();
    assert_eq!(delivered["id"], 50);
    assert_eq!(delivered["type"], "event");
    assert_eq!(delivered["event_type"], "client_broadcast");
    assert_eq!(delivered["sender_name"], "Sender");
    assert_eq!(delivered["sender_type"], "controller");
    assert_eq!(delivered["payload"]["x"], 1);

    // The bystander subscribed but was not targeted.
    let silence = tokio::time::timeout(Duration::from_millis(50), c.recv()).await;
    assert!(silence.is_err());

    assert_eq!(hub.stats().broadcasts_sent, 1);
}

#[tokio::test]
async fn broadcast_to_all_excludes_sender() {
    let hub = Hub::new(HubConfig::default());
    let (_uid_a, mut a) = join(&hub, 4035).await;
    let (uid_b, mut b) = join(&hub, 4036).await;

    identify(&mut a, 1, "Bob", "controller").await;
    let reply_b = identify(&mut b, 1, "Bob", "visualiser").await;
    assert_eq!(reply_b["name"], "Bob (2)");

    b.send_json(&json!({"id": 40, "type": "subscribe_event", "event_type": "client_broadcast"}))
        .await;
    identify(&mut b, 2, "Bob (2)", "visualiser").await;

    a.send_json(&json!({
        "id": 5,
        "type": "broadcast",
        "data": {
            "broadcast_type": "custom",
            "target": {"mode": "all"},
            "payload": {"x": 1},
        },
    }))
    .await;

    let receipt = a.recv_json().await.unwrap();
    assert_eq!(receipt["event_type"], "broadcast_sent");
    assert_eq!(receipt["targets_matched"], 1);
    assert_eq!(receipt["target_uuids"][0], uid_b.to_string());

    let delivered = b.recv_json().await.unwrap();
    assert_eq!(delivered["event_type"], "client_broadcast");
    assert_eq!(delivered["payload"]["x"], 1);
}

#[tokio::test]
async fn broadcast_with_no_matches_is_an_error() {
    let hub = Hub::new(HubConfig::default());
    let (_uid, mut peer) = join(&hub, 4040).await;
    identify(&mut peer, 1, "Lonely", "controller").await;

    // Mode `all` excludes the sender and nobody else is connected.
    peer.send_json(&json!({
        "id": 8,
        "type": "broadcast",
        "data": {
            "broadcast_type": "custom",
            "target": {"mode": "all"},
            "payload": {},
        },
    }))
    .await;

    let reply = peer.recv_json().await.unwrap();
    assert_eq!(reply["success"], false);
    assert!(reply["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("No clients matched target specification"));
}

#[tokio::test]
async fn broadcast_oversized_payload_rejected() {
    let hub = Hub::new(HubConfig::default());
    let (_uid, mut peer) = join(&hub, 4041).await;

    peer.send_json(&json!({
        "id": 9,
        "type": "broadcast",
        "data": {
            "broadcast_type": "custom",
            "target": {"mode": "all"},
            "payload": {"pad": "x".repeat(4096)},
        },
    }))
    .await;

    let reply = peer.recv_json().await.unwrap();
    assert_eq!(reply["success"], false);
    assert!(reply["error"]["message"]
        .as_str()
        .unwrap()
        .contains("exceeds maximum"));
}

#[tokio::test]
async fn broadcast_spoofed_sender_field_rejected() {
    let hub = Hub::new(HubConfig::default());
    let (_uid, mut peer) = join(&hub, 4042).await;

    peer.send_json(&json!({
        "id": 10,
        "type": "broadcast",
        "data": {
            "broadcast_type": "custom",
            "target": {"mode": "all"},
            "payload": {},
            "sender_name": "Impostor",
        },
    }))
    .await;

    let reply = peer.recv_json().await.unwrap();
    assert_eq!(reply["success"], false);
    assert!(reply["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid broadcast data:"));
}

#[tokio::test]
async fn subscribe_non_subscribable_event_rejected() {
    let hub = Hub::new(HubConfig::default());
    let (_uid, mut peer) = join(&hub, 4050).await;

    peer.send_json(&json!({"id": 11, "type": "subscribe_event", "event_type": "device_update"}))
        .await;

    let reply = peer.recv_json().await.unwrap();
    assert_eq!(reply["success"], false);
    assert_eq!(
        reply["error"]["message"],
        "Cannot subscribe to device_update events. Use visualisation_update instead"
    );
}

#[tokio::test]
async fn song_info_event_with_filter() {
    let hub = Hub::new(HubConfig::default());
    let (_uid, mut listener) = join(&hub, 4060).await;
    let (_uid2, mut source) = join(&hub, 4061).await;

    listener
        .send_json(&json!({
            "id": 12,
            "type": "subscribe_event",
            "event_type": "song_detected",
            "event_filter": {"artist": "Aurora"},
        }))
        .await;
    identify(&mut listener, 1, "Listener", "display").await;

    // Filtered out: wrong artist.
    source
        .send_json(&json!({"id": 1, "type": "song_info", "artist": "Else", "title": "A"}))
        .await;
    // Delivered.
    source
        .send_json(&json!({"id": 2, "type": "song_info", "artist": "Aurora", "title": "Runaway"}))
        .await;

    let delivered = listener.recv_json().await.unwrap();
    assert_eq!(delivered["event_type"], "song_detected");
    assert_eq!(delivered["artist"], "Aurora");
    assert_eq!(delivered["title"], "Runaway");
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let hub = Hub::new(HubConfig::default());
    let (_uid, mut listener) = join(&hub, 4070).await;
    let (_uid2, mut other) = join(&hub, 4071).await;

    listener
        .send_json(&json!({"id": 13, "type": "subscribe_event", "event_type": "clients_updated"}))
        .await;
    listener
        .send_json(&json!({"id": 13, "type": "unsubscribe_event"}))
        .await;
    identify(&mut listener, 1, "Quiet", "api").await;

    // Fires clients_updated; the listener must not receive it (its own
    // identify reply was already consumed above).
    identify(&mut other, 1, "Noisy", "api").await;

    let silence = tokio::time::timeout(Duration::from_millis(50), listener.recv()).await;
    assert!(silence.is_err());
}

#[tokio::test]
async fn unknown_command_keeps_session_alive() {
    let hub = Hub::new(HubConfig::default());
    let (_uid, mut peer) = join(&hub, 4080).await;

    peer.send_json(&json!({"id": 14, "type": "frobnicate"})).await;
    let reply = peer.recv_json().await.unwrap();
    assert_eq!(reply["success"], false);
    assert_eq!(reply["error"]["message"], "Unknown command type.");

    // Still serviceable.
    let reply = identify(&mut peer, 15, "Survivor", "api").await;
    assert_eq!(reply["name"], "Survivor");
}

#[tokio::test]
async fn invalid_envelope_closes_session_with_diagnostic() {
    let hub = Hub::new(HubConfig::default());
    let (_uid, mut peer) = join(&hub, 4081).await;

    // Has an id but no type: the diagnostic is correlated, then the session
    // closes.
    peer.send_json(&json!({"id": 16})).await;
    let reply = peer.recv_json().await.unwrap();
    assert_eq!(reply["error"]["message"], "Invalid message format.");

    assert!(peer.recv().await.is_none());
    wait_for_count(&hub, 0).await;
}

#[tokio::test]
async fn non_json_frame_closes_session() {
    let hub = Hub::new(HubConfig::default());
    let (_uid, mut peer) = join(&hub, 4082).await;

    peer.send("this is not json").await;
    assert!(peer.recv().await.is_none());
}

#[tokio::test]
async fn disconnect_cleans_up_registry_and_stats() {
    let hub = Hub::new(HubConfig::default());
    let (uid, mut peer) = join(&hub, 4090).await;
    identify(&mut peer, 1, "Ghost", "mobile").await;

    peer.close();

    wait_for_count(&hub, 0).await;
    assert!(!hub.registry().snapshot().await.contains_key(&uid));
    for _ in 0..200 {
        if hub.stats().active_connections == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(hub.stats().active_connections, 0);
    assert_eq!(hub.stats().total_connections, 1);
}

#[tokio::test]
async fn legacy_audio_frame_preserves_sample_order() {
    let hub = Hub::new(HubConfig::default());
    let (_uid, mut peer) = join(&hub, 4098).await;

    hub.audio().activate("web-legacy", None).await;

    // More than ten keys so lexicographic iteration would scramble the
    // buffer ("10" sorts before "2").
    let mut data = serde_json::Map::new();
    for i in 0..12 {
        data.insert(i.to_string(), json!(i as f64));
    }
    peer.send_json(&json!({
        "id": 1,
        "type": "audio_stream_data",
        "client": "web-legacy",
        "data": data,
    }))
    .await;

    for _ in 0..200 {
        if hub.audio().latest().await.is_some_and(|frame| frame.len() == 12) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let frame = hub.audio().latest().await.unwrap();
    let expected: Vec<f32> = (0..12).map(|i| i as f32).collect();
    assert_eq!(frame, expected);
}

#[tokio::test]
async fn forwarder_overflow_closes_session() {
    // Capacity zero makes every push fail even after the overflow drop,
    // which must close the whole session, not just the forwarder.
    let hub = Hub::new(HubConfig::default().max_pending_messages(0));
    let (_uid, mut listener) = join(&hub, 4100).await;
    let (_uid2, other) = join(&hub, 4101).await;

    listener
        .send_json(&json!({"id": 20, "type": "subscribe_event", "event_type": "clients_updated"}))
        .await;
    // No reply to await with a zero-capacity queue; give the subscribe
    // dispatch a moment before triggering an event.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Teardown of the other session fires clients_updated.
    other.close();

    assert!(listener.recv().await.is_none());
    wait_for_count(&hub, 0).await;
}

#[tokio::test]
async fn shutdown_reaches_lagged_sessions() {
    let hub = Hub::new(HubConfig::default().event_bus_capacity(1));
    let (_uid, mut peer) = join(&hub, 4102).await;

    // Flood the bus far past its capacity so any receiver is lagging.
    for _ in 0..64 {
        hub.events().fire(ws_hub::events::Event::ClientsUpdated);
    }
    hub.shutdown();

    assert!(peer.recv().await.is_none());
    wait_for_count(&hub, 0).await;
}

#[tokio::test]
async fn shutdown_closes_all_sessions() {
    let hub = Hub::new(HubConfig::default());
    let (_uid_a, mut a) = join(&hub, 4091).await;
    let (_uid_b, mut b) = join(&hub, 4092).await;

    wait_for_count(&hub, 2).await;

    hub.shutdown();

    assert!(a.recv().await.is_none());
    assert!(b.recv().await.is_none());
    wait_for_count(&hub, 0).await;
}

#[tokio::test]
async fn audio_stream_lifecycle_over_wire() {
    let hub = Hub::new(HubConfig::default());
    let (_uid, mut peer) = join(&hub, 4095).await;

    peer.send_json(&json!({"id": 1, "type": "audio_stream_start", "client": "web-1"}))
        .await;
    for _ in 0..200 {
        if hub.audio().is_announced("web-1").await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(hub.audio().is_announced("web-1").await);

    hub.audio().activate("web-1", None).await;

    // 1000 as PCM16 little-endian, base64.
    let encoded = {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(1000i16.to_le_bytes())
    };
    peer.send_json(&json!({
        "id": 2,
        "type": "audio_stream_data_v2",
        "client": "web-1",
        "data": encoded,
    }))
    .await;

    for _ in 0..200 {
        if hub.audio().latest().await.is_some_and(|frame| frame.len() == 1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let frame = hub.audio().latest().await.unwrap();
    assert_eq!(frame.len(), 1);
    assert!((frame[0] - 1000.0 / 32767.0).abs() < 1e-6);

    peer.send_json(&json!({"id": 3, "type": "audio_stream_stop", "client": "web-1"}))
        .await;
    for _ in 0..200 {
        if !hub.audio().is_announced("web-1").await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!hub.audio().is_announced("web-1").await);
}
