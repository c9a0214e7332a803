//! Process-wide domain event bus
//!
//! Fan-out is built on `tokio::sync::broadcast`: every session that holds a
//! subscription runs a forwarding task pulling from its own receiver, so a
//! slow session never stalls the producer or its peers. Lagged receivers
//! drop the oldest events rather than blocking the bus.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::broadcast::BroadcastEvent;

/// Media metadata submitted through the `song_info` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SongInfo {
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub position: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub playing: bool,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// A domain event delivered through the bus.
#[derive(Debug, Clone)]
pub enum Event {
    ClientConnected { client_id: Uuid, origin: SocketAddr },
    ClientDisconnected { client_id: Uuid, origin: SocketAddr },
    /// Aggregate roster change; observers refresh their client list on this.
    ClientsUpdated,
    ClientBroadcast(BroadcastEvent),
    SongDetected(SongInfo),
}

impl Event {
    /// The wire tag clients subscribe by.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::ClientConnected { .. } => "client_connected",
            Event::ClientDisconnected { .. } => "client_disconnected",
            Event::ClientsUpdated => "clients_updated",
            Event::ClientBroadcast(_) => "client_broadcast",
            Event::SongDetected(_) => "song_detected",
        }
    }

    /// Serialize to the flat field map delivered inside event notifications.
    pub fn to_json(&self) -> Value {
        let mut fields = match self {
            Event::ClientConnected { client_id, origin } => json!({
                "client_id": client_id,
                "origin": origin.to_string(),
            }),
            Event::ClientDisconnected { client_id, origin } => json!({
                "client_id": client_id,
                "origin": origin.to_string(),
            }),
            Event::ClientsUpdated => json!({}),
            Event::ClientBroadcast(b) => serde_json::to_value(b).unwrap_or_else(|_| json!({})),
            Event::SongDetected(info) => serde_json::to_value(info).unwrap_or_else(|_| json!({})),
        };

        if let Some(map) = fields.as_object_mut() {
            map.insert("event_type".into(), json!(self.event_type()));
        }
        fields
    }

    /// Whether this event may be delivered to the given session.
    ///
    /// Broadcast events are filtered hub-side against the resolved target
    /// set; everything else is visible to any subscriber.
    pub fn visible_to(&self, uid: Uuid) -> bool {
        match self {
            Event::ClientBroadcast(b) => b.target_uuids.contains(&uid),
            _ => true,
        }
    }
}

/// Flat key/value filter match against an event's serialized fields.
///
/// An empty filter matches everything.
pub fn filter_matches(filter: &Map<String, Value>, event_json: &Value) -> bool {
    filter
        .iter()
        .all(|(key, expected)| event_json.get(key) == Some(expected))
}

/// The hub's event bus.
///
/// Firing never blocks; events fired with no live subscribers are dropped.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Deliver an event to all current subscribers.
    pub fn fire(&self, event: Event) {
        tracing::debug!(event_type = event.event_type(), "Firing event");
        let _ = self.tx.send(event);
    }

    /// Open a new receiver on the bus.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BroadcastType, ClientType};

    #[test]
    fn test_event_types() {
        assert_eq!(Event::ClientsUpdated.event_type(), "clients_updated");
        assert_eq!(
            Event::SongDetected(SongInfo {
                title: "T".into(),
                artist: "A".into(),
                album: String::new(),
                thumbnail: None,
                position: None,
                duration: None,
                playing: false,
                timestamp: None,
            })
            .event_type(),
            "song_detected"
        );
    }

    #[test]
    fn test_to_json_carries_event_type() {
        let json = Event::ClientsUpdated.to_json();
        assert_eq!(json["event_type"], "clients_updated");
    }

    #[test]
    fn test_broadcast_visibility_is_target_filtered() {
        let target = Uuid::new_v4();
        let bystander = Uuid::new_v4();
        let event = Event::ClientBroadcast(BroadcastEvent::new(
            BroadcastType::Custom,
            Uuid::new_v4(),
            "Sender".into(),
            ClientType::Controller,
            vec![target],
            json!({"x": 1}),
        ));

        assert!(event.visible_to(target));
        assert!(!event.visible_to(bystander));
        assert!(Event::ClientsUpdated.visible_to(bystander));
    }

    #[test]
    fn test_filter_matches() {
        let event = json!({"event_type": "song_detected", "artist": "Aurora"});

        let mut filter = Map::new();
        assert!(filter_matches(&filter, &event));

        filter.insert("artist".into(), json!("Aurora"));
        assert!(filter_matches(&filter, &event));

        filter.insert("artist".into(), json!("Someone Else"));
        assert!(!filter_matches(&filter, &event));

        let mut missing_key = Map::new();
        missing_key.insert("album".into(), json!("X"));
        assert!(!filter_matches(&missing_key, &event));
    }

    #[tokio::test]
    async fn test_bus_fan_out() {
        let bus = EventBus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.fire(Event::ClientsUpdated);

        assert!(matches!(rx1.recv().await.unwrap(), Event::ClientsUpdated));
        assert!(matches!(rx2.recv().await.unwrap(), Event::ClientsUpdated));
    }

    #[tokio::test]
    async fn test_fire_without_subscribers_is_noop() {
        let bus = EventBus::new(8);
        bus.fire(Event::ClientsUpdated);
    }
}
