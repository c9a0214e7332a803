//! The hub itself
//!
//! `Hub` owns the shared process state (registry, event bus, audio bridge,
//! stats, dispatch table) and spawns a connection task per prepared duplex
//! channel. `Connection` runs the per-session receive loop and send loop.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod handlers;
pub mod hub;

pub use config::HubConfig;
pub use connection::Connection;
pub use dispatch::DispatchTable;
pub use hub::Hub;
