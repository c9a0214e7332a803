//! Per-session connection loop
//!
//! One task per connected client. The receive loop pulls frames off the
//! wire and dispatches them one at a time in arrival order; a companion
//! send loop drains the outbound queue onto the wire. Teardown runs once
//! regardless of which side closed first.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::hub::HubShared;
use crate::error::{HubError, Result};
use crate::events::Event;
use crate::protocol::{client_id_announcement, error_message, Envelope};
use crate::session::{OutboundMessage, OutboundQueue, SessionPhase, SessionState, Subscription};
use crate::wire::{Wire, WireSender};

/// A live client session.
pub struct Connection {
    pub(crate) state: SessionState,
    pub(crate) queue: Arc<OutboundQueue>,
    pub(crate) shared: Arc<HubShared>,
    pub(crate) subscriptions: HashMap<i64, Subscription>,
    /// Tripped by background producers (event forwarders) that hit an
    /// unrecoverable queue overflow; the receive loop observes it and
    /// tears the session down.
    pub(crate) close_signal: Arc<Notify>,
}

impl Connection {
    pub(crate) fn new(uid: Uuid, origin: SocketAddr, shared: Arc<HubShared>) -> Self {
        let queue = Arc::new(OutboundQueue::new(shared.config.max_pending_messages));
        Self {
            state: SessionState::new(uid, origin),
            queue,
            shared,
            subscriptions: HashMap::new(),
            close_signal: Arc::new(Notify::new()),
        }
    }

    /// Drive the session from handshake to teardown.
    pub(crate) async fn run(mut self, wire: Wire) {
        let uid = self.state.uid;
        let (mut rx, tx) = wire.split();

        // The client id announcement goes out directly on the wire, before
        // the send loop exists, so it is always the first frame delivered.
        let announcement = client_id_announcement(uid);
        let first_frame = match serde_json::to_string(&announcement) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(client_id = %uid, error = %err, "Unable to serialize announcement");
                self.shared.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
                return;
            }
        };
        if tx.send(first_frame).await.is_err() {
            tracing::info!(client_id = %uid, "Peer gone before handshake completed");
            self.shared.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
            return;
        }

        self.shared.registry.register(uid, self.state.origin).await;
        self.state.open();

        let sender = tokio::spawn(send_loop(uid, Arc::clone(&self.queue), tx));

        tracing::info!(client_id = %uid, origin = %self.state.origin, "Client connected");
        self.shared.events.fire(Event::ClientConnected {
            client_id: uid,
            origin: self.state.origin,
        });

        // The watch channel retains the shutdown flag, so the signal
        // cannot be missed by a session that was busy when it fired.
        let mut shutdown = self.shared.shutdown.subscribe();
        let close_signal = Arc::clone(&self.close_signal);

        if *shutdown.borrow_and_update() {
            tracing::info!(client_id = %uid, "Hub already shutting down, closing session");
        } else {
            loop {
                tokio::select! {
                    frame = rx.recv() => match frame {
                        Some(text) => {
                            if let Err(err) = self.dispatch(&text).await {
                                match err {
                                    HubError::Protocol(reason) => {
                                        tracing::info!(client_id = %uid, %reason, "Invalid message format, closing session");
                                    }
                                    HubError::QueueOverflow(_) => {
                                        self.shared.stats.queue_overflows.fetch_add(1, Ordering::Relaxed);
                                        tracing::error!(client_id = %uid, "Outbound queue unrecoverable, closing session");
                                    }
                                    other => {
                                        tracing::error!(client_id = %uid, error = %other, "Handler failed, closing session");
                                    }
                                }
                                break;
                            }
                        }
                        None => {
                            tracing::info!(client_id = %uid, "Connection closed by client");
                            break;
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow_and_update() {
                            tracing::info!(client_id = %uid, "Shutdown signal received, closing session");
                            break;
                        }
                    }
                    _ = close_signal.notified() => {
                        tracing::error!(client_id = %uid, "Session close requested by event forwarder, closing session");
                        break;
                    }
                }
            }
        }

        self.teardown(sender).await;
    }

    /// Validate one inbound frame and hand it to its handler.
    async fn dispatch(&mut self, text: &str) -> Result<()> {
        self.shared
            .stats
            .messages_dispatched
            .fetch_add(1, Ordering::Relaxed);

        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                tracing::info!(client_id = %self.state.uid, error = %err, "Frame is not valid JSON");
                return Err(crate::protocol::EnvelopeError::NotAnObject.into());
            }
        };

        let envelope = match Envelope::parse(value.clone()) {
            Ok(envelope) => envelope,
            Err(err) => {
                // Tell the peer before hanging up, if an id is recoverable.
                if let Some(id) = Envelope::peek_id(&value) {
                    self.send_error(id, "Invalid message format.").await?;
                }
                return Err(err.into());
            }
        };

        match self.shared.dispatch.get(&envelope.msg_type) {
            Some(handler) => handler(self, envelope).await,
            None => {
                tracing::error!(
                    client_id = %self.state.uid,
                    msg_type = %envelope.msg_type,
                    "Received unknown command"
                );
                self.send_error(envelope.id, "Unknown command type.").await
            }
        }
    }

    /// Queue an outbound message.
    pub(crate) async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.queue.push(message).await?;
        Ok(())
    }

    pub(crate) async fn send_json(&self, body: Value) -> Result<()> {
        self.send(OutboundMessage::reply(body)).await
    }

    pub(crate) async fn send_error(&self, id: i64, message: &str) -> Result<()> {
        self.send_json(error_message(id, message)).await
    }

    /// Orderly teardown. Idempotent via the phase guard.
    async fn teardown(&mut self, sender: JoinHandle<()>) {
        if self.state.phase == SessionPhase::Closed {
            return;
        }
        self.state.begin_close();
        let uid = self.state.uid;

        self.shared.registry.deregister(uid).await;
        self.shared.registry.remove_metadata(uid).await;

        for (subscription_id, subscription) in self.subscriptions.drain() {
            tracing::debug!(
                client_id = %uid,
                subscription_id,
                event_type = %subscription.event_type,
                "Releasing subscription"
            );
            subscription.cancel();
        }

        // Flush what is already queued, then stop the send loop.
        self.queue.push_stop().await;
        let _ = sender.await;

        self.state.close();
        self.shared.stats.active_connections.fetch_sub(1, Ordering::Relaxed);

        self.shared.events.fire(Event::ClientDisconnected {
            client_id: uid,
            origin: self.state.origin,
        });
        self.shared.events.fire(Event::ClientsUpdated);

        tracing::info!(client_id = %uid, "Client disconnected");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("uid", &self.state.uid)
            .field("phase", &self.state.phase)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

/// Drain the outbound queue onto the wire until the stop sentinel or the
/// peer hangs up.
async fn send_loop(uid: Uuid, queue: Arc<OutboundQueue>, tx: WireSender) {
    tracing::debug!(client_id = %uid, "Sender loop started");

    while let Some(message) = queue.pop().await {
        match serde_json::to_string(&message.body) {
            Ok(text) => {
                if tx.send(text).await.is_err() {
                    tracing::info!(client_id = %uid, "Peer gone, stopping sender loop");
                    break;
                }
            }
            Err(err) => {
                // An unserializable body skips that message only.
                tracing::error!(client_id = %uid, error = %err, "Unable to serialize outbound message");
            }
        }
    }

    tracing::debug!(client_id = %uid, "Sender loop stopped");
}
