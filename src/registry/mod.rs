//! Connected-client registry and gateway port pool.
//!
//! One instance is owned by the [`Harness`](crate::harness::Harness)
//! composition root and shared by the channel server (connect/disconnect)
//! and the dispatcher (reverse port lookup). In port-per-client mode each
//! connecting client reserves the smallest free gateway port; in broadcast
//! mode clients are recorded without a port and every dispatch fans out.
//!
//! Reservation and release happen under one lock, so two simultaneous
//! connects can never be handed the same port. Registry mutations are
//! published on a `tokio::sync::broadcast` channel for anyone who wants to
//! observe membership changes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DispatchMode;

/// Opaque per-connection identifier, minted by the channel server on accept.
pub type ClientId = Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no free gateway port for a new client")]
    PortsExhausted,
}

/// A registry mutation, published to subscribers as it happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Connected { client_id: ClientId, port: Option<u16> },
    Disconnected { client_id: ClientId },
}

/// Snapshot of one connected client, as shown on the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub connected_at: DateTime<Utc>,
}

struct Inner {
    clients: HashMap<ClientId, ClientInfo>,
    /// Bound gateway ports not currently reserved. Smallest-first handout
    /// keeps test runs deterministic about which port a client gets.
    free_ports: BTreeSet<u16>,
    by_port: HashMap<u16, ClientId>,
}

/// Shared client/port registry.
///
/// Clone freely — it is backed by an `Arc` and is `Send + Sync`.
#[derive(Clone)]
pub struct ClientRegistry {
    mode: DispatchMode,
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl ClientRegistry {
    /// `bound_ports` are the gateway ports that actually bound at startup;
    /// they form the reservable pool in port-per-client mode.
    pub fn new(mode: DispatchMode, bound_ports: impl IntoIterator<Item = u16>) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            mode,
            inner: Arc::new(Mutex::new(Inner {
                clients: HashMap::new(),
                free_ports: bound_ports.into_iter().collect(),
                by_port: HashMap::new(),
            })),
            events,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Record a newly-connected client, reserving a port in port-per-client
    /// mode. Returns the reserved port, or `None` in broadcast mode.
    ///
    /// Exhaustion fails only this connection attempt; the registry and every
    /// other client are unaffected.
    pub async fn connect(&self, client_id: ClientId) -> Result<Option<u16>, RegistryError> {
        let port = {
            let mut inner = self.inner.lock().await;
            let port = match self.mode {
                DispatchMode::Broadcast => None,
                DispatchMode::PortPerClient => {
                    let Some(port) = inner.free_ports.pop_first() else {
                        warn!(%client_id, "client refused: port pool exhausted");
                        return Err(RegistryError::PortsExhausted);
                    };
                    inner.by_port.insert(port, client_id);
                    Some(port)
                }
            };
            inner.clients.insert(
                client_id,
                ClientInfo { client_id, port, connected_at: Utc::now() },
            );
            port
        };
        info!(%client_id, ?port, "client connected");
        let _ = self.events.send(RegistryEvent::Connected { client_id, port });
        Ok(port)
    }

    /// Remove a client and return its reserved port to the pool.
    /// Unknown ids are logged and ignored.
    pub async fn disconnect(&self, client_id: ClientId) {
        let removed = {
            let mut inner = self.inner.lock().await;
            match inner.clients.remove(&client_id) {
                Some(info) => {
                    if let Some(port) = info.port {
                        inner.by_port.remove(&port);
                        inner.free_ports.insert(port);
                    }
                    true
                }
                None => false,
            }
        };
        if !removed {
            warn!(%client_id, "disconnect for unknown client ignored");
            return;
        }
        info!(%client_id, "client disconnected");
        let _ = self.events.send(RegistryEvent::Disconnected { client_id });
    }

    /// Which client owns `port`? Used by the dispatcher in port-per-client
    /// mode to resolve the inbound listener to a routing target.
    pub async fn client_for_port(&self, port: u16) -> Option<ClientId> {
        self.inner.lock().await.by_port.get(&port).copied()
    }

    /// The port reserved for `client_id`, if any.
    pub async fn port_for(&self, client_id: ClientId) -> Option<u16> {
        self.inner
            .lock()
            .await
            .clients
            .get(&client_id)
            .and_then(|info| info.port)
    }

    pub async fn client_count(&self) -> usize {
        self.inner.lock().await.clients.len()
    }

    /// All connected clients, sorted by connection time then id.
    pub async fn snapshot(&self) -> Vec<ClientInfo> {
        let inner = self.inner.lock().await;
        let mut v: Vec<_> = inner.clients.values().cloned().collect();
        v.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then(a.client_id.cmp(&b.client_id))
        });
        v
    }

    /// Observe registry mutations. Slow subscribers lose old events, which
    /// is fine for change notification.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    #[cfg(test)]
    async fn free_port_count(&self) -> usize {
        self.inner.lock().await.free_ports.len()
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
