//! Crate-wide error types
//!
//! Per-concern errors live next to the code that produces them
//! (`protocol::EnvelopeError`, `registry::RegistryError`, ...); this module
//! aggregates the ones that session loops propagate. Registry conflicts
//! are answered with error replies instead of propagating, and transport
//! failures trigger teardown directly, so neither appears here.

use thiserror::Error;

use crate::protocol::EnvelopeError;
use crate::session::QueueOverflow;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HubError>;

/// Top-level error type for hub operations.
///
/// Any variant returned from a message handler is fatal to the owning
/// session only; the process is never affected.
#[derive(Debug, Error)]
pub enum HubError {
    /// The inbound message violated the base envelope contract.
    #[error("invalid message envelope: {0}")]
    Protocol(#[from] EnvelopeError),

    /// The outbound queue refilled immediately after an overflow drop.
    #[error(transparent)]
    QueueOverflow(#[from] QueueOverflow),

    /// The hub is at its configured connection limit.
    #[error("connection limit reached")]
    ConnectionLimit,
}
