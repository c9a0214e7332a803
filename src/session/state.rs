//! Session state machine
//!
//! Tracks one client connection from handshake to teardown, together with
//! the identity the client has declared so far.

use std::net::SocketAddr;
use std::time::SystemTime;

use uuid::Uuid;

use crate::protocol::ClientType;

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Transport handshake in progress.
    Connecting,
    /// Receive loop running, messages dispatched in arrival order.
    Open,
    /// Orderly teardown: deregistration, subscription release, queue flush.
    Closing,
    /// Terminal. No further operations permitted.
    Closed,
}

/// Per-session state, owned exclusively by the connection's lifetime.
#[derive(Debug)]
pub struct SessionState {
    /// Globally unique session id, generated at connect.
    pub uid: Uuid,

    /// Remote peer address.
    pub origin: SocketAddr,

    /// When the connection was established.
    pub connected_at: SystemTime,

    /// Current phase.
    pub phase: SessionPhase,

    /// Declared name, unset until the client identifies itself.
    pub declared_name: Option<String>,

    /// Declared client type.
    pub declared_type: ClientType,

    /// Opaque device identifier supplied by the client.
    pub device_id: Option<String>,
}

impl SessionState {
    pub fn new(uid: Uuid, origin: SocketAddr) -> Self {
        Self {
            uid,
            origin,
            connected_at: SystemTime::now(),
            phase: SessionPhase::Connecting,
            declared_name: None,
            declared_type: ClientType::Unknown,
            device_id: None,
        }
    }

    /// Handshake complete: presence registered, send loop started.
    pub fn open(&mut self) {
        if self.phase == SessionPhase::Connecting {
            self.phase = SessionPhase::Open;
        }
    }

    /// Begin orderly teardown. Safe to call from any live phase.
    pub fn begin_close(&mut self) {
        if self.phase != SessionPhase::Closed {
            self.phase = SessionPhase::Closing;
        }
    }

    /// Teardown finished.
    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
    }

    pub fn is_open(&self) -> bool {
        self.phase == SessionPhase::Open
    }

    /// The name used in outbound sender identity: the declared name, or the
    /// default derived from the uid if the client never set one.
    pub fn display_name(&self) -> String {
        self.declared_name
            .clone()
            .unwrap_or_else(|| default_name(self.uid))
    }
}

/// Default client name: `Client-` plus the first 8 hex digits of the uid.
pub fn default_name(uid: Uuid) -> String {
    let s = uid.to_string();
    format!("Client-{}", &s[..8])
}
