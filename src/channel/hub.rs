//! Per-client outbound queues.
//!
//! The channel server attaches one bounded mpsc sender per accepted
//! connection; a writer task on the other end serialises frames onto the
//! socket. The dispatcher only ever talks to the hub, so concurrent
//! in-flight requests can send to the same client without coordinating.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use super::wire::HarnessFrame;
use crate::registry::ClientId;

/// Outbound frames queued per connection before backpressure kicks in.
pub const WRITER_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("client {0} is not attached")]
    UnknownClient(ClientId),

    #[error("client {0} cannot accept frames (queue full or connection closing)")]
    SendFailed(ClientId),
}

/// Routing table from client id to that connection's writer queue.
///
/// Clone freely — it is backed by an `Arc` and is `Send + Sync`.
#[derive(Clone, Default)]
pub struct ChannelHub {
    senders: Arc<RwLock<HashMap<ClientId, mpsc::Sender<HarnessFrame>>>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's writer queue and hand back its receiving end.
    pub async fn attach(&self, client_id: ClientId) -> mpsc::Receiver<HarnessFrame> {
        let (tx, rx) = mpsc::channel(WRITER_QUEUE_DEPTH);
        self.senders.write().await.insert(client_id, tx);
        rx
    }

    /// Drop a connection's queue. Frames already queued still drain through
    /// the writer task's receiver.
    pub async fn detach(&self, client_id: ClientId) {
        self.senders.write().await.remove(&client_id);
    }

    /// Queue a frame for one client.
    ///
    /// `try_send` keeps the dispatcher from blocking on a stuck connection;
    /// a full queue is a dispatch failure for that request, not a stall.
    pub async fn send_to_one(
        &self,
        client_id: ClientId,
        frame: HarnessFrame,
    ) -> Result<(), HubError> {
        let senders = self.senders.read().await;
        let tx = senders
            .get(&client_id)
            .ok_or(HubError::UnknownClient(client_id))?;
        tx.try_send(frame)
            .map_err(|_| HubError::SendFailed(client_id))
    }

    /// Queue a frame for every attached client; returns how many accepted it.
    ///
    /// Per-client failures are skipped — in broadcast mode one stuck client
    /// must not stop the others from receiving the request.
    pub async fn send_to_all(&self, frame: HarnessFrame) -> usize {
        let senders = self.senders.read().await;
        let mut delivered = 0;
        for (client_id, tx) in senders.iter() {
            match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    debug!(%client_id, "broadcast frame dropped for saturated client");
                }
            }
        }
        delivered
    }

    pub async fn client_count(&self) -> usize {
        self.senders.read().await.len()
    }
}
