//! Built-in message handlers
//!
//! One function per message type tag. Handlers validate their own
//! sub-schema on top of the base envelope, reply through the session's
//! outbound queue, and fire domain events for anything observers care
//! about. A handler returning `Err` is fatal to its session only.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use super::connection::Connection;
use crate::audio::decode_pcm16;
use crate::broadcast::{payload_size, payload_within_cap, resolve_targets, BroadcastEvent, BroadcastRequest};
use crate::error::Result;
use crate::events::{filter_matches, Event, SongInfo};
use crate::protocol::{event_message, non_subscribable_hint, ClientType, Envelope, MAX_PAYLOAD_SIZE};
use crate::registry::{ClientMetadata, RegistryError};
use crate::session::{default_name, OutboundMessage, Subscription};

fn normalize_type(uid: Uuid, raw: &str) -> ClientType {
    ClientType::parse(raw).unwrap_or_else(|| {
        tracing::warn!(client_id = %uid, declared = raw, "Invalid client type, defaulting to 'unknown'");
        ClientType::Unknown
    })
}

/// `set_client_info`: declare name, type and device id.
///
/// The name is reserved atomically; on conflict the client receives a
/// suffixed variant and `name_conflict: true` in the reply.
pub fn set_client_info<'a>(conn: &'a mut Connection, env: Envelope) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let uid = conn.state.uid;
        let data = env.data();

        let desired = data
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_name(uid));
        let client_type = data
            .get("type")
            .and_then(Value::as_str)
            .map_or(ClientType::Unknown, |raw| normalize_type(uid, raw));
        let device_id = data
            .get("device_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        conn.state.declared_type = client_type;
        conn.state.device_id = device_id.clone();

        let record = ClientMetadata {
            origin: conn.state.origin,
            name: desired,
            client_type,
            device_id,
            connected_at: conn.state.connected_at,
        };
        let (resolved, conflict) = conn.shared.registry.reserve_and_set_name(uid, record).await;
        conn.state.declared_name = Some(resolved.clone());

        tracing::info!(
            client_id = %uid,
            name = %resolved,
            client_type = %client_type,
            conflict,
            "Client identified"
        );

        conn.send_json(json!({
            "id": env.id,
            "event_type": "client_info_updated",
            "client_id": uid,
            "name": resolved,
            "type": client_type,
            "name_conflict": conflict,
        }))
        .await?;

        conn.shared.events.fire(Event::ClientsUpdated);
        Ok(())
    })
}

/// `update_client_info`: partial identity update.
///
/// A taken name rejects the whole update; the previous identity stays in
/// force.
pub fn update_client_info<'a>(conn: &'a mut Connection, env: Envelope) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let uid = conn.state.uid;
        let data = env.data();

        let new_name = data
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let new_type = data
            .get("type")
            .and_then(Value::as_str)
            .map(|raw| normalize_type(uid, raw));

        if new_name.is_none() && new_type.is_none() {
            return conn.send_error(env.id, "No valid updates provided").await;
        }

        // Seeds a record from the session if the client never identified.
        let fallback = ClientMetadata {
            origin: conn.state.origin,
            name: conn.state.display_name(),
            client_type: conn.state.declared_type,
            device_id: conn.state.device_id.clone(),
            connected_at: conn.state.connected_at,
        };

        match conn.shared.registry.update(uid, new_name, new_type, fallback).await {
            Ok(record) => {
                conn.state.declared_name = Some(record.name.clone());
                conn.state.declared_type = record.client_type;

                tracing::info!(
                    client_id = %uid,
                    name = %record.name,
                    client_type = %record.client_type,
                    "Client info updated"
                );

                conn.send_json(json!({
                    "id": env.id,
                    "event_type": "client_info_updated",
                    "client_id": uid,
                    "name": record.name,
                    "type": record.client_type,
                }))
                .await?;

                conn.shared.events.fire(Event::ClientsUpdated);
                Ok(())
            }
            Err(err @ RegistryError::NameTaken(_)) => {
                conn.send_error(env.id, &err.to_string()).await
            }
        }
    })
}

/// `broadcast`: validated client-to-client fan-out.
pub fn broadcast<'a>(conn: &'a mut Connection, env: Envelope) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let request: BroadcastRequest = match serde_json::from_value(Value::Object(env.data())) {
            Ok(request) => request,
            Err(err) => {
                return conn
                    .send_error(env.id, &format!("Invalid broadcast data: {err}"))
                    .await;
            }
        };

        if !request.payload.is_object() {
            return conn
                .send_error(env.id, "Invalid broadcast data: payload must be an object")
                .await;
        }
        if !payload_within_cap(&request.payload) {
            let message = format!(
                "Payload size ({} bytes) exceeds maximum ({} bytes)",
                payload_size(&request.payload),
                MAX_PAYLOAD_SIZE
            );
            return conn.send_error(env.id, &message).await;
        }

        let clients = conn.shared.registry.snapshot().await;
        let targets = resolve_targets(&request.target, &clients, conn.state.uid);
        if targets.is_empty() {
            let message = format!(
                "No clients matched target specification: {:?}",
                request.target
            );
            return conn.send_error(env.id, &message).await;
        }

        let event = BroadcastEvent::new(
            request.broadcast_type,
            conn.state.uid,
            conn.state.display_name(),
            conn.state.declared_type,
            targets,
            request.payload,
        );

        // Audit line: who sent what to how many.
        tracing::info!(
            broadcast_id = %event.broadcast_id,
            broadcast_type = %event.broadcast_type,
            sender_uuid = %event.sender_uuid,
            sender_name = %event.sender_name,
            targets = event.target_uuids.len(),
            "Broadcast accepted"
        );

        let receipt = json!({
            "id": env.id,
            "event_type": "broadcast_sent",
            "broadcast_id": event.broadcast_id,
            "targets_matched": event.target_uuids.len(),
            "target_uuids": event.target_uuids,
        });

        conn.shared.events.fire(Event::ClientBroadcast(event));
        conn.shared.stats.broadcasts_sent.fetch_add(1, Ordering::Relaxed);

        conn.send_json(receipt).await
    })
}

/// `subscribe_event`: open a standing event subscription.
///
/// Spawns a forwarding task pulling from a dedicated bus receiver so a slow
/// session never stalls the bus. A second subscribe with the same id
/// replaces the first.
pub fn subscribe_event<'a>(conn: &'a mut Connection, env: Envelope) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let Some(event_type) = env
            .field("event_type")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return conn
                .send_error(env.id, "subscribe_event requires an 'event_type' field")
                .await;
        };

        if let Some(hint) = non_subscribable_hint(&event_type) {
            tracing::warn!(client_id = %conn.state.uid, event_type = %event_type, "Rejected non-subscribable event");
            let message = format!("Cannot subscribe to {event_type} events. {hint}");
            return conn.send_error(env.id, &message).await;
        }

        let filter = match env.field("event_filter") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        let subscription_id = env.id;
        let uid = conn.state.uid;
        let queue = Arc::clone(&conn.queue);
        let close_signal = Arc::clone(&conn.close_signal);
        let shared = Arc::clone(&conn.shared);
        let mut rx = conn.shared.events.subscribe();
        let topic = event_type.clone();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if event.event_type() != topic || !event.visible_to(uid) {
                            continue;
                        }
                        let fields = event.to_json();
                        if !filter_matches(&filter, &fields) {
                            continue;
                        }

                        let message = OutboundMessage::event(
                            subscription_id,
                            topic.clone(),
                            event_message(subscription_id, fields),
                        );
                        if queue.push(message).await.is_err() {
                            // The post-drop refill failed; the whole
                            // session closes, not just this forwarder.
                            shared.stats.queue_overflows.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(
                                client_id = %uid,
                                subscription_id,
                                "Outbound queue unrecoverable, closing session"
                            );
                            close_signal.notify_one();
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(client_id = %uid, subscription_id, skipped, "Event forwarder lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        tracing::debug!(client_id = %uid, subscription_id, event_type = %event_type, "Subscription opened");

        if let Some(previous) = conn
            .subscriptions
            .insert(subscription_id, Subscription::new(event_type, handle))
        {
            tracing::debug!(client_id = %uid, subscription_id, event_type = %previous.event_type, "Replacing subscription");
            previous.cancel();
        }

        Ok(())
    })
}

/// `unsubscribe_event`: release the subscription opened under the same id.
///
/// Unknown ids are a logged no-op.
pub fn unsubscribe_event<'a>(conn: &'a mut Connection, env: Envelope) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let subscription_id = env.id;
        match conn.subscriptions.remove(&subscription_id) {
            Some(subscription) => {
                tracing::debug!(
                    client_id = %conn.state.uid,
                    subscription_id,
                    event_type = %subscription.event_type,
                    "Subscription closed"
                );
                subscription.cancel();
            }
            None => {
                tracing::warn!(client_id = %conn.state.uid, subscription_id, "Unsubscribe for unknown subscription");
            }
        }
        Ok(())
    })
}

/// `audio_stream_start`: announce a web-audio source.
pub fn audio_stream_start<'a>(conn: &'a mut Connection, env: Envelope) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        if let Some(client) = env.field("client").and_then(Value::as_str) {
            conn.shared.audio.announce(client).await;
        }
        Ok(())
    })
}

/// `audio_stream_stop`: retire a web-audio source.
pub fn audio_stream_stop<'a>(conn: &'a mut Connection, env: Envelope) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        if let Some(client) = env.field("client").and_then(Value::as_str) {
            conn.shared.audio.retire(client).await;
        }
        Ok(())
    })
}

/// `audio_stream_config`: logged for diagnostics; the audio pipeline picks
/// its own parameters.
pub fn audio_stream_config<'a>(conn: &'a mut Connection, env: Envelope) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        tracing::info!(
            client_id = %conn.state.uid,
            client = ?env.field("client"),
            config = ?env.field("data"),
            "Web audio config received"
        );
        Ok(())
    })
}

/// `audio_stream_data`: legacy float-map sample frame.
///
/// Values are taken in object order, which survives parsing because
/// `serde_json` is built with `preserve_order`.
pub fn audio_stream_data<'a>(conn: &'a mut Connection, env: Envelope) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let Some(client) = env.field("client").and_then(Value::as_str) else {
            return Ok(());
        };
        let Some(Value::Object(map)) = env.field("data") else {
            return Ok(());
        };

        let samples: Vec<f32> = map
            .values()
            .filter_map(Value::as_f64)
            .map(|v| v as f32)
            .collect();
        conn.shared.audio.submit(client, samples).await;
        Ok(())
    })
}

/// `audio_stream_data_v2`: base64 PCM16 sample frame.
///
/// A frame that fails to decode is dropped without affecting the session.
pub fn audio_stream_data_v2<'a>(conn: &'a mut Connection, env: Envelope) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let Some(client) = env.field("client").and_then(Value::as_str) else {
            return Ok(());
        };
        let Some(encoded) = env.field("data").and_then(Value::as_str) else {
            return Ok(());
        };

        match decode_pcm16(encoded) {
            Ok(samples) => conn.shared.audio.submit(client, samples).await,
            Err(err) => {
                tracing::info!(client_id = %conn.state.uid, error = %err, "Incorrect base64 padding, dropping frame");
            }
        }
        Ok(())
    })
}

/// `song_info`: media metadata from the client, republished as a domain
/// event.
pub fn song_info<'a>(conn: &'a mut Connection, env: Envelope) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let body = env.body();
        let info = SongInfo {
            title: body
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string(),
            artist: body
                .get("artist")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string(),
            album: body
                .get("album")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            thumbnail: body
                .get("thumbnail")
                .and_then(Value::as_str)
                .map(str::to_string),
            position: body.get("position").and_then(Value::as_f64),
            duration: body.get("duration").and_then(Value::as_f64),
            playing: body.get("playing").and_then(Value::as_bool).unwrap_or(false),
            timestamp: body.get("timestamp").and_then(Value::as_f64),
        };

        tracing::info!(artist = %info.artist, title = %info.title, "Song info received");
        conn.shared.events.fire(Event::SongDetected(info));
        Ok(())
    })
}
