//! Hub configuration

use crate::protocol::MAX_PENDING_MESSAGES;

/// Hub configuration options.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound delivery queue capacity per session.
    pub max_pending_messages: usize,

    /// Event bus channel capacity.
    pub event_bus_capacity: usize,

    /// Maximum concurrent connections (0 = unlimited).
    pub max_connections: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_pending_messages: MAX_PENDING_MESSAGES,
            event_bus_capacity: 256,
            max_connections: 0, // Unlimited
        }
    }
}

impl HubConfig {
    /// Set the per-session outbound queue capacity.
    pub fn max_pending_messages(mut self, capacity: usize) -> Self {
        self.max_pending_messages = capacity;
        self
    }

    /// Set the event bus channel capacity.
    pub fn event_bus_capacity(mut self, capacity: usize) -> Self {
        self.event_bus_capacity = capacity;
        self
    }

    /// Set maximum connections.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
}
