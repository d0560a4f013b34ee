//! Bounded in-memory log of completed exchanges.
//!
//! Every terminal dispatch outcome is recorded here and exposed by the
//! admin surface. The log is a fixed-capacity ring: old exchanges fall off
//! the front, so inspection never grows the process.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dispatch::DispatchOutcome;

/// One finished request/response exchange.
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    pub request_id: Uuid,
    pub method: String,
    pub path: String,
    /// The gateway port the request arrived on.
    pub port: u16,
    pub outcome: DispatchOutcome,
    /// Status code of the response written to the caller.
    pub status: u16,
    pub elapsed_ms: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub completed_at: DateTime<Utc>,
}

/// Shared ring buffer of recent exchanges.
///
/// Clone freely — it is backed by an `Arc` and is `Send + Sync`.
#[derive(Clone)]
pub struct TrafficLog {
    capacity: usize,
    entries: Arc<Mutex<VecDeque<Exchange>>>,
}

impl TrafficLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.max(1)))),
        }
    }

    pub async fn record(&self, exchange: Exchange) {
        let mut entries = self.entries.lock().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(exchange);
    }

    /// Recorded exchanges, oldest first.
    pub async fn snapshot(&self) -> Vec<Exchange> {
        self.entries.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
