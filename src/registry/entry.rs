//! Registry record types

use std::net::SocketAddr;
use std::time::SystemTime;

use crate::protocol::ClientType;

/// Declared identity of a connected client.
///
/// A record exists for a uid exactly while that client is connected and has
/// issued at least one identity-setting message.
#[derive(Debug, Clone)]
pub struct ClientMetadata {
    /// Remote address the connection arrived from.
    pub origin: SocketAddr,

    /// Declared name, unique among live records.
    pub name: String,

    /// Declared client type.
    pub client_type: ClientType,

    /// Opaque device identifier supplied by the client.
    pub device_id: Option<String>,

    /// When the connection was established.
    pub connected_at: SystemTime,
}
