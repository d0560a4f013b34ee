//! Ordered handler store with last-registered-wins resolution.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::debug;

use super::Handler;
use crate::matcher::RouteCaptures;
use crate::model::MockRequest;

/// Opaque token returned by [`HandlerRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// A matched handler plus the route captures that matched it.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub handler: Handler,
    pub captures: RouteCaptures,
}

struct Slot {
    id: HandlerId,
    enabled: bool,
    handler: Handler,
}

/// Append-only sequence of handlers owned by one client.
///
/// Resolution scans newest-first, so a later registration shadows an earlier
/// one that matches the same requests. Disabled slots keep their position and
/// can be re-enabled without changing precedence.
///
/// Clone freely — it is backed by an `Arc` and is `Send + Sync`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    slots: Arc<RwLock<Vec<Slot>>>,
    next_id: Arc<AtomicU64>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Never displaces existing registrations.
    pub async fn register(&self, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(handler = ?handler.name(), id = id.0, "handler registered");
        self.slots.write().await.push(Slot { id, enabled: true, handler });
        id
    }

    /// Enable or disable a handler in place. `false` when `id` is unknown.
    pub async fn set_enabled(&self, id: HandlerId, enabled: bool) -> bool {
        let mut slots = self.slots.write().await;
        match slots.iter_mut().find(|s| s.id == id) {
            Some(slot) => {
                slot.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Find the newest enabled handler matching `req`.
    ///
    /// The handler is cloned out so no lock is held while it responds.
    pub async fn resolve(&self, req: &MockRequest) -> Option<Resolution> {
        let slots = self.slots.read().await;
        for slot in slots.iter().rev() {
            if !slot.enabled {
                continue;
            }
            if let Some(captures) = slot.handler.matches(req) {
                return Some(Resolution { handler: slot.handler.clone(), captures });
            }
        }
        None
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}
