//! Real-time session hub for device-control applications.
//!
//! The hub sits behind a transport wrapper that terminates WebSocket
//! connections and hands over prepared duplex channels of JSON text
//! frames. For each channel the hub runs a session: it announces the
//! session's unique client id, tracks declared identity in a central
//! registry with atomic name-conflict resolution, dispatches inbound
//! messages to per-type handlers, and fans out domain events and
//! validated client-to-client broadcasts through a process-wide event
//! bus. Slow consumers are isolated by a bounded, deduplicating outbound
//! queue per session.
//!
//! ```no_run
//! use ws_hub::{Hub, HubConfig};
//!
//! # async fn demo(wire: ws_hub::wire::Wire) -> ws_hub::Result<()> {
//! let hub = Hub::new(HubConfig::default().max_connections(100));
//! let origin = "203.0.113.7:52100".parse().unwrap();
//! let client_id = hub.connect(wire, origin)?;
//! tracing::info!(%client_id, "session started");
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod broadcast;
pub mod error;
pub mod events;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod wire;

pub use error::{HubError, Result};
pub use server::{Hub, HubConfig};
