//! Outbound delivery queue
//!
//! Bounded, deduplicating queue decoupling message producers (handlers and
//! event forwarders) from the network write path. The overflow policy
//! favors liveness over completeness: a full queue is dropped wholesale
//! rather than blocking a producer or disconnecting a merely-slow consumer.

use std::collections::VecDeque;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

/// Supersession key for transient updates.
///
/// Two pending messages with the same key describe the same evolving state
/// (an event stream delivered for one subscription); only the newest is
/// worth sending to a consumer that fell behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupKey {
    pub subscription_id: i64,
    pub topic: String,
}

/// A message waiting for the send loop.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub body: Value,
    pub dedup: Option<DedupKey>,
}

impl OutboundMessage {
    /// A direct reply; never deduplicated.
    pub fn reply(body: Value) -> Self {
        Self { body, dedup: None }
    }

    /// An event notification forwarded for a subscription; a newer
    /// notification for the same subscription and topic supersedes it.
    pub fn event(subscription_id: i64, topic: impl Into<String>, body: Value) -> Self {
        Self {
            body,
            dedup: Some(DedupKey {
                subscription_id,
                topic: topic.into(),
            }),
        }
    }
}

enum Item {
    Message(OutboundMessage),
    /// Instructs the send loop to stop after flushing everything ahead.
    Stop,
}

/// The queue refilled to capacity immediately after an overflow drop; the
/// producer closes the session instead of blocking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("outbound queue still full after overflow drop")]
pub struct QueueOverflow;

/// Bounded deduplicating queue with a stop sentinel.
#[derive(Debug)]
pub struct OutboundQueue {
    inner: Mutex<VecDeque<Item>>,
    notify: Notify,
    capacity: usize,
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Item::Message(m) => f.debug_tuple("Message").field(&m.body).finish(),
            Item::Stop => f.write_str("Stop"),
        }
    }
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueue a message for the send loop.
    ///
    /// If the queue is at capacity it is cleared entirely first. If it is
    /// somehow still full after the drop, the push fails and the caller
    /// must close the session.
    pub async fn push(&self, message: OutboundMessage) -> Result<(), QueueOverflow> {
        let mut queue = self.inner.lock().await;

        if queue.len() >= self.capacity {
            tracing::warn!(
                dropped = queue.len(),
                capacity = self.capacity,
                "Outbound queue full, dropping all pending messages"
            );
            queue.clear();
        }

        if let Some(key) = &message.dedup {
            queue.retain(|item| !matches!(item, Item::Message(m) if m.dedup.as_ref() == Some(key)));
        }

        if queue.len() >= self.capacity {
            return Err(QueueOverflow);
        }

        queue.push_back(Item::Message(message));
        drop(queue);

        self.notify.notify_one();
        Ok(())
    }

    /// Enqueue the stop sentinel. The send loop flushes everything already
    /// queued, then exits.
    pub async fn push_stop(&self) {
        let mut queue = self.inner.lock().await;
        queue.push_back(Item::Stop);
        drop(queue);

        self.notify.notify_one();
    }

    /// Wait for the next message. Returns `None` when the stop sentinel is
    /// reached.
    pub async fn pop(&self) -> Option<OutboundMessage> {
        loop {
            {
                let mut queue = self.inner.lock().await;
                match queue.pop_front() {
                    Some(Item::Message(message)) => {
                        // Wake any other pending pop if items remain.
                        if !queue.is_empty() {
                            self.notify.notify_one();
                        }
                        return Some(message);
                    }
                    Some(Item::Stop) => return None,
                    None => {}
                }
            }
            self.notify.notified().await;
        }
    }

    /// Number of pending items, sentinel included.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
