//! Message dispatch table
//!
//! Maps the `type` tag of an inbound envelope to its handler. The table is
//! built once at hub construction; handlers run on the session's receive
//! loop, one message at a time, in arrival order.

use std::collections::HashMap;

use futures::future::BoxFuture;

use super::connection::Connection;
use super::handlers;
use crate::error::Result;
use crate::protocol::Envelope;

/// A message handler.
///
/// Handlers borrow the connection mutably for the duration of the call, so
/// a session never processes two messages concurrently.
pub type HandlerFn = for<'a> fn(&'a mut Connection, Envelope) -> BoxFuture<'a, Result<()>>;

/// Registered handlers, keyed by message type tag.
#[derive(Debug, Default)]
pub struct DispatchTable {
    handlers: HashMap<&'static str, HandlerFn>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The table with every built-in message type registered.
    pub fn builtin() -> Self {
        let mut table = Self::new();

        table.register("set_client_info", handlers::set_client_info);
        table.register("update_client_info", handlers::update_client_info);
        table.register("broadcast", handlers::broadcast);
        table.register("subscribe_event", handlers::subscribe_event);
        table.register("unsubscribe_event", handlers::unsubscribe_event);
        table.register("audio_stream_start", handlers::audio_stream_start);
        table.register("audio_stream_stop", handlers::audio_stream_stop);
        table.register("audio_stream_config", handlers::audio_stream_config);
        table.register("audio_stream_data", handlers::audio_stream_data);
        table.register("audio_stream_data_v2", handlers::audio_stream_data_v2);
        table.register("song_info", handlers::song_info);

        table
    }

    /// Register a handler for a message type tag.
    pub fn register(&mut self, tag: &'static str, handler: HandlerFn) {
        if self.handlers.insert(tag, handler).is_some() {
            tracing::warn!(tag, "Replaced existing handler registration");
        }
    }

    /// Look up the handler for a message type.
    pub fn get(&self, tag: &str) -> Option<HandlerFn> {
        self.handlers.get(tag).copied()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.handlers.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
