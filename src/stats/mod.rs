//! Hub-wide statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained by the hub across all sessions.
#[derive(Debug, Default)]
pub struct HubStats {
    /// Total connections ever accepted.
    pub total_connections: AtomicU64,
    /// Currently open connections.
    pub active_connections: AtomicU64,
    /// Inbound messages dispatched to handlers.
    pub messages_dispatched: AtomicU64,
    /// Broadcasts accepted and handed to the event bus.
    pub broadcasts_sent: AtomicU64,
    /// Sessions closed because their outbound queue overflowed twice.
    pub queue_overflows: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub messages_dispatched: u64,
    pub broadcasts_sent: u64,
    pub queue_overflows: u64,
}

impl HubStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            broadcasts_sent: self.broadcasts_sent.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
        }
    }
}
