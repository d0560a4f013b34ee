//! Pending-reply correlation store.
//!
//! Turns an asynchronous, channel-delivered reply back into a synchronous
//! answer for the HTTP task that is holding the connection open:
//!
//! 1. the dispatcher [`register`]s the request id and gets a [`ReplyTicket`],
//! 2. the request is sent to a client over the message channel,
//! 3. the dispatcher [`wait`]s on the ticket with a deadline,
//! 4. a reply arriving on any channel connection is [`complete`]d into the
//!    store, which resolves the waiting task exactly once.
//!
//! Registration happens before the request leaves the process, so a reply
//! can never arrive ahead of its entry. Whichever of completion and timeout
//! comes first removes the entry; the loser sees a missing entry and is
//! dropped as stale. The store therefore never grows beyond the number of
//! requests currently in flight.
//!
//! [`register`]: PendingReplies::register
//! [`wait`]: PendingReplies::wait
//! [`complete`]: PendingReplies::complete

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::MockResponse;

/// Why a wait ended without a response.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("no reply arrived within the deadline")]
    TimedOut,

    #[error("pending entry was abandoned before a reply arrived")]
    Abandoned,
}

/// Outcome of delivering a reply into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A waiter received this response.
    Delivered,
    /// No entry for the id: already answered, timed out, or never
    /// registered. The response is dropped.
    Stale,
}

/// Proof of registration, held by the task that will wait for the reply.
///
/// A ticket must be passed to [`PendingReplies::wait`] or
/// [`PendingReplies::abandon`]; silently dropping it would leave the entry
/// in the store until someone completes it.
#[derive(Debug)]
pub struct ReplyTicket {
    id: Uuid,
    token: u64,
    rx: oneshot::Receiver<MockResponse>,
}

impl ReplyTicket {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

struct Entry {
    /// Registration token. A timed-out waiter only removes the entry if the
    /// token still matches, so it can never evict a successor registered
    /// under the same id.
    token: u64,
    tx: oneshot::Sender<MockResponse>,
}

/// Shared map of in-flight requests awaiting a client reply.
///
/// Clone freely — it is backed by an `Arc` and is `Send + Sync`.
#[derive(Clone, Default)]
pub struct PendingReplies {
    entries: Arc<Mutex<HashMap<Uuid, Entry>>>,
    next_token: Arc<AtomicU64>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry for `id` and hand back the ticket to wait on.
    ///
    /// Registering an id that is already pending is a caller bug; the old
    /// entry is replaced (its waiter observes [`WaitError::Abandoned`]) and
    /// a warning is logged.
    pub async fn register(&self, id: Uuid) -> ReplyTicket {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let previous = self.entries.lock().await.insert(id, Entry { token, tx });
        if previous.is_some() {
            warn!(%id, "duplicate pending registration; replacing previous waiter");
        }
        ReplyTicket { id, token, rx }
    }

    /// Suspend until the reply arrives or `timeout` elapses.
    ///
    /// On timeout the entry is removed before returning, so a reply arriving
    /// afterwards is stale and can never complete this request.
    pub async fn wait(
        &self,
        ticket: ReplyTicket,
        timeout: Duration,
    ) -> Result<MockResponse, WaitError> {
        let ReplyTicket { id, token, rx } = ticket;
        match tokio::time::timeout(timeout, rx).await {
            // complete() already removed the entry.
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                // Sender dropped without sending: replaced by a duplicate
                // registration, or the store was torn down.
                self.remove_if_token(id, token).await;
                Err(WaitError::Abandoned)
            }
            Err(_) => {
                self.remove_if_token(id, token).await;
                debug!(%id, "pending wait timed out");
                Err(WaitError::TimedOut)
            }
        }
    }

    /// Remove a registration without waiting.
    ///
    /// Used when dispatch fails after registering but before waiting, so the
    /// entry does not linger until a timeout that will never be armed.
    pub async fn abandon(&self, ticket: ReplyTicket) {
        self.remove_if_token(ticket.id, ticket.token).await;
    }

    /// Deliver a client reply to whoever is waiting for it.
    ///
    /// Stale replies (no matching entry) are reported, not errored: in
    /// broadcast mode every reply after the first for the same request lands
    /// here, by design.
    pub async fn complete(&self, response: MockResponse) -> Completion {
        let id = response.id;
        let entry = self.entries.lock().await.remove(&id);
        match entry {
            Some(entry) => match entry.tx.send(response) {
                Ok(()) => Completion::Delivered,
                // Waiter vanished between timing out and removing the entry.
                Err(_) => {
                    debug!(%id, "reply raced a departing waiter; dropped");
                    Completion::Stale
                }
            },
            None => {
                debug!(%id, "stale reply dropped");
                Completion::Stale
            }
        }
    }

    /// Number of requests currently awaiting a reply.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    async fn remove_if_token(&self, id: Uuid, token: u64) {
        let mut entries = self.entries.lock().await;
        if entries.get(&id).is_some_and(|e| e.token == token) {
            entries.remove(&id);
        }
    }
}
