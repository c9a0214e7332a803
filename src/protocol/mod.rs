//! Wire-level protocol types
//!
//! Defines the inbound message envelope, the outbound message shapes, and
//! the closed sets of constants shared with clients. The hub speaks JSON
//! text frames over a prepared duplex channel; the transport handshake
//! itself is an external concern.

pub mod constants;
pub mod envelope;

pub use constants::{
    non_subscribable_hint, BroadcastType, ClientType, MAX_PAYLOAD_SIZE, MAX_PENDING_MESSAGES,
    PCM16_MAX,
};
pub use envelope::{
    client_id_announcement, error_message, event_message, Envelope, EnvelopeError,
};
