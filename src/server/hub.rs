//! Hub entry point
//!
//! `Hub` owns the shared state and accepts prepared duplex channels from
//! the transport wrapper, spawning one connection task per channel.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use uuid::Uuid;

use super::config::HubConfig;
use super::connection::Connection;
use super::dispatch::DispatchTable;
use crate::audio::AudioBridge;
use crate::error::{HubError, Result};
use crate::events::EventBus;
use crate::registry::ClientRegistry;
use crate::stats::{HubStats, StatsSnapshot};
use crate::wire::Wire;

/// State shared by the hub and every connection task.
#[derive(Debug)]
pub(crate) struct HubShared {
    pub config: HubConfig,
    pub registry: ClientRegistry,
    pub events: EventBus,
    pub audio: AudioBridge,
    pub stats: HubStats,
    pub dispatch: DispatchTable,
    /// Process-wide shutdown flag. A `watch` channel retains the latest
    /// value, so the signal is observed even by a session that was busy
    /// when it fired.
    pub shutdown: watch::Sender<bool>,
}

/// The session hub.
#[derive(Debug)]
pub struct Hub {
    shared: Arc<HubShared>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(HubShared {
            registry: ClientRegistry::new(),
            events: EventBus::new(config.event_bus_capacity),
            audio: AudioBridge::new(),
            stats: HubStats::new(),
            dispatch: DispatchTable::builtin(),
            shutdown,
            config,
        });

        Self {
            shared,
            connection_semaphore,
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.shared.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn audio(&self) -> &AudioBridge {
        &self.shared.audio
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Accept a prepared duplex channel and spawn its session task.
    ///
    /// Returns the session uid; the same uid is announced to the peer as
    /// its first frame.
    pub fn connect(&self, wire: Wire, origin: SocketAddr) -> Result<Uuid> {
        let permit = match &self.connection_semaphore {
            Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(%origin, "Connection limit reached, rejecting connection");
                    return Err(HubError::ConnectionLimit);
                }
            },
            None => None,
        };

        let uid = Uuid::new_v4();
        self.shared.stats.total_connections.fetch_add(1, Ordering::Relaxed);
        self.shared.stats.active_connections.fetch_add(1, Ordering::Relaxed);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            Connection::new(uid, origin, shared).run(wire).await;
            drop(permit);
        });

        Ok(uid)
    }

    /// Signal every live session to close.
    pub fn shutdown(&self) {
        tracing::info!("Hub shutting down, closing all sessions");
        let _ = self.shared.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[tokio::test]
    async fn test_connect_counts_and_announces() {
        let hub = Hub::new(HubConfig::default());
        let (hub_wire, mut peer) = wire::pair(8);

        let uid = hub.connect(hub_wire, addr(4001)).unwrap();

        let announcement = peer.recv_json().await.unwrap();
        assert_eq!(announcement["event_type"], "client_id");
        assert_eq!(announcement["client_id"], uid.to_string());

        assert_eq!(hub.stats().total_connections, 1);
        assert_eq!(hub.stats().active_connections, 1);
    }

    #[tokio::test]
    async fn test_connection_limit_rejects() {
        let hub = Hub::new(HubConfig::default().max_connections(1));

        let (first, _peer1) = wire::pair(8);
        hub.connect(first, addr(4002)).unwrap();

        let (second, _peer2) = wire::pair(8);
        let err = hub.connect(second, addr(4003)).unwrap_err();
        assert!(matches!(err, HubError::ConnectionLimit));
    }
}
