//! Session state and per-session plumbing
//!
//! A session is the server-side object representing one live client
//! connection: its lifecycle phase, declared identity, outbound delivery
//! queue, and active event subscriptions.

pub mod queue;
pub mod state;

use tokio::task::JoinHandle;

pub use queue::{DedupKey, OutboundMessage, OutboundQueue, QueueOverflow};
pub use state::{default_name, SessionPhase, SessionState};

/// A standing event subscription owned by a session.
///
/// Wraps the forwarding task; cancelling (or dropping at teardown) aborts
/// it, which is the subscription's unsubscribe action. Aborting is
/// idempotent, so release-on-teardown after an explicit unsubscribe is
/// harmless.
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
    /// Event type the subscription forwards, kept for logging.
    pub event_type: String,
}

impl Subscription {
    pub fn new(event_type: impl Into<String>, handle: JoinHandle<()>) -> Self {
        Self {
            handle,
            event_type: event_type.into(),
        }
    }

    /// Invoke the unsubscribe action.
    pub fn cancel(self) {
        // Drop aborts the forwarding task.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
