//! Client registry implementation
//!
//! The central registry that tracks connected clients and enforces the
//! name-uniqueness invariant under concurrent registration.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::Mutex;
use uuid::Uuid;

use super::entry::ClientMetadata;
use super::error::RegistryError;
use crate::protocol::ClientType;

/// Central registry for all connected clients.
///
/// Critical sections are read-modify-persist only and never wrap a network
/// operation. The presence and metadata locks are acquired independently
/// and never nested.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    /// uid -> origin address, maintained for the whole connection lifetime.
    presence: Mutex<HashMap<Uuid, SocketAddr>>,

    /// uid -> declared identity, present once the client identifies itself.
    metadata: Mutex<HashMap<Uuid, ClientMetadata>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection in the presence map.
    pub async fn register(&self, uid: Uuid, origin: SocketAddr) {
        let mut presence = self.presence.lock().await;
        presence.insert(uid, origin);

        tracing::debug!(client_id = %uid, origin = %origin, "Presence registered");
    }

    /// Remove a connection from the presence map.
    pub async fn deregister(&self, uid: Uuid) -> Option<SocketAddr> {
        let mut presence = self.presence.lock().await;
        presence.remove(&uid)
    }

    /// Copy of the presence map.
    pub async fn presence_snapshot(&self) -> HashMap<Uuid, SocketAddr> {
        self.presence.lock().await.clone()
    }

    /// Number of connected clients.
    pub async fn connected_count(&self) -> usize {
        self.presence.lock().await.len()
    }

    /// Atomically resolve name conflicts and persist the metadata record.
    ///
    /// The lock over the metadata map is held for the whole
    /// check-resolve-persist sequence, which is what rules out two racing
    /// clients ending up with the same name. On conflict the desired name
    /// gets a ` (N)` suffix, with N starting at 2 and increasing with each
    /// further clash.
    ///
    /// Returns the resolved name and whether it differs from the request.
    pub async fn reserve_and_set_name(
        &self,
        uid: Uuid,
        mut record: ClientMetadata,
    ) -> (String, bool) {
        let mut metadata = self.metadata.lock().await;

        let desired = record.name.clone();
        let mut resolved = desired.clone();
        let mut counter = 1u32;
        let mut conflict = false;

        loop {
            let taken = metadata
                .iter()
                .any(|(other, meta)| *other != uid && meta.name == resolved);
            if !taken {
                break;
            }
            conflict = true;
            counter += 1;
            resolved = format!("{desired} ({counter})");
        }

        record.name = resolved.clone();
        metadata.insert(uid, record);

        (resolved, conflict)
    }

    /// Atomically apply a partial identity update.
    ///
    /// Re-validates name availability (excluding the caller's own record)
    /// before persisting; a taken name rejects the whole update without
    /// mutating anything. If the client has no record yet, `fallback`
    /// seeds one from the session's current state.
    pub async fn update(
        &self,
        uid: Uuid,
        new_name: Option<String>,
        new_type: Option<ClientType>,
        fallback: ClientMetadata,
    ) -> Result<ClientMetadata, RegistryError> {
        let mut metadata = self.metadata.lock().await;

        let mut record = metadata.get(&uid).cloned().unwrap_or(fallback);

        if let Some(name) = new_name {
            let taken = metadata
                .iter()
                .any(|(other, meta)| *other != uid && meta.name == name);
            if taken {
                return Err(RegistryError::NameTaken(name));
            }
            record.name = name;
        }

        if let Some(client_type) = new_type {
            record.client_type = client_type;
        }

        metadata.insert(uid, record.clone());

        Ok(record)
    }

    /// Remove a client's metadata record, if any.
    pub async fn remove_metadata(&self, uid: Uuid) -> Option<ClientMetadata> {
        let mut metadata = self.metadata.lock().await;
        metadata.remove(&uid)
    }

    /// Consistent copy of all metadata records, taken under one lock
    /// acquisition. Broadcast targeting resolves against this snapshot.
    pub async fn snapshot(&self) -> HashMap<Uuid, ClientMetadata> {
        self.metadata.lock().await.clone()
    }
}
