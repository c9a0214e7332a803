//! Prepared duplex channel
//!
//! The transport wrapper (an external collaborator) terminates the actual
//! WebSocket, then hands the hub one of these: a stream of inbound text
//! frames and a sink for outbound ones. Peer disconnect surfaces as the
//! inbound stream ending and outbound sends failing.

use tokio::sync::mpsc;

use serde_json::Value;
use thiserror::Error;

/// Transport-level failure. Fatal to the session, never surfaced to the
/// peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("connection closed by peer")]
    Closed,
}

/// Inbound half: text frames from the peer. `None` means the peer closed.
#[derive(Debug)]
pub struct WireReceiver {
    rx: mpsc::Receiver<String>,
}

impl WireReceiver {
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Outbound half: text frames to the peer.
#[derive(Debug, Clone)]
pub struct WireSender {
    tx: mpsc::Sender<String>,
}

impl WireSender {
    pub async fn send(&self, text: String) -> Result<(), WireError> {
        self.tx.send(text).await.map_err(|_| WireError::Closed)
    }
}

/// A prepared duplex channel as handed off by the transport wrapper.
#[derive(Debug)]
pub struct Wire {
    incoming: mpsc::Receiver<String>,
    outgoing: mpsc::Sender<String>,
}

impl Wire {
    /// Assemble a wire from raw channel halves. This is the seam the
    /// transport wrapper uses to hand a connection to the hub.
    pub fn from_channels(incoming: mpsc::Receiver<String>, outgoing: mpsc::Sender<String>) -> Self {
        Self { incoming, outgoing }
    }

    pub fn split(self) -> (WireReceiver, WireSender) {
        (
            WireReceiver { rx: self.incoming },
            WireSender { tx: self.outgoing },
        )
    }
}

/// The peer end of an in-memory wire, used by tests and local tooling.
#[derive(Debug)]
pub struct Peer {
    tx: mpsc::Sender<String>,
    rx: mpsc::Receiver<String>,
}

impl Peer {
    /// Send a text frame to the hub. Returns `false` if the hub side is
    /// gone.
    pub async fn send(&self, text: impl Into<String>) -> bool {
        self.tx.send(text.into()).await.is_ok()
    }

    pub async fn send_json(&self, value: &Value) -> bool {
        match serde_json::to_string(value) {
            Ok(text) => self.send(text).await,
            Err(_) => false,
        }
    }

    /// Receive the next frame from the hub. `None` means the hub closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Hang up: the hub observes the inbound stream ending.
    pub fn close(self) {}
}

/// An in-memory wire pair: the hub side and the peer side.
pub fn pair(buffer: usize) -> (Wire, Peer) {
    let (peer_tx, hub_rx) = mpsc::channel(buffer);
    let (hub_tx, peer_rx) = mpsc::channel(buffer);
    (
        Wire::from_channels(hub_rx, hub_tx),
        Peer {
            tx: peer_tx,
            rx: peer_rx,
        },
    )
}
