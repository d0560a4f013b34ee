//! Request dispatch — ties the registry, channel and pending store together.
//!
//! Per-request lifecycle:
//!
//! 1. the gateway builds the [`MockRequest`] and calls [`Dispatcher::dispatch`],
//! 2. the pending entry is registered before anything leaves the process,
//! 3. the request is forwarded to its target client(s) over the hub,
//! 4. the dispatcher waits on the pending store with the configured deadline,
//! 5. the client's reply — or a synthesized failure response — goes back to
//!    the HTTP caller, and the exchange is recorded in the traffic log.
//!
//! Failures before the wait (no client, send failure) abandon the pending
//! entry immediately so the store only ever tracks requests actually in
//! flight. A request no client-side handler matched comes back as an
//! ordinary completion carrying the fixed 501 response.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::channel::{ChannelHub, HarnessFrame};
use crate::config::DispatchMode;
use crate::model::{MockRequest, MockResponse};
use crate::pending::{PendingReplies, WaitError};
use crate::registry::ClientRegistry;
use crate::traffic::{Exchange, TrafficLog};

/// Terminal state of one dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// A client replied in time (including the client-side 501 for
    /// unmatched requests).
    Completed,
    /// No reply arrived within the deadline.
    TimedOut,
    /// No client was available for this request's port (or at all, in
    /// broadcast mode).
    NoClient,
    /// The channel refused the send.
    DispatchFailed,
}

/// Stateless front door for inbound requests.
///
/// Clone freely — all fields are cheaply cloneable shared handles.
#[derive(Clone)]
pub struct Dispatcher {
    mode: DispatchMode,
    registry: ClientRegistry,
    hub: ChannelHub,
    pending: PendingReplies,
    traffic: TrafficLog,
    reply_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        mode: DispatchMode,
        registry: ClientRegistry,
        hub: ChannelHub,
        pending: PendingReplies,
        traffic: TrafficLog,
        reply_timeout: Duration,
    ) -> Self {
        Self { mode, registry, hub, pending, traffic, reply_timeout }
    }

    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Forward `req` to its target client(s) and wait for the reply.
    ///
    /// Always returns a well-formed response; failures become synthetic
    /// responses with the appropriate status code.
    pub async fn dispatch(&self, req: MockRequest, inbound_port: u16) -> MockResponse {
        let started = std::time::Instant::now();
        let id = req.id;
        let method = req.method.clone();
        let path = req.path.clone();

        let (outcome, response) = self.run(req, inbound_port).await;

        let exchange = Exchange {
            request_id: id,
            method,
            path,
            port: inbound_port,
            outcome,
            status: response.status,
            elapsed_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        };
        self.traffic.record(exchange).await;

        response
    }

    async fn run(&self, req: MockRequest, inbound_port: u16) -> (DispatchOutcome, MockResponse) {
        let id = req.id;

        // Register before sending so a fast reply cannot beat its own entry.
        let ticket = self.pending.register(id).await;

        match self.mode {
            DispatchMode::Broadcast => {
                let delivered = self
                    .hub
                    .send_to_all(HarnessFrame::Request { request: req })
                    .await;
                if delivered == 0 {
                    self.pending.abandon(ticket).await;
                    debug!(%id, "no clients connected for broadcast");
                    return (DispatchOutcome::NoClient, MockResponse::no_client(id));
                }
                debug!(%id, delivered, "request broadcast");
            }
            DispatchMode::PortPerClient => {
                let Some(client_id) = self.registry.client_for_port(inbound_port).await else {
                    self.pending.abandon(ticket).await;
                    debug!(%id, port = inbound_port, "no client bound to port");
                    return (DispatchOutcome::NoClient, MockResponse::no_client(id));
                };
                if let Err(e) = self
                    .hub
                    .send_to_one(client_id, HarnessFrame::Request { request: req })
                    .await
                {
                    self.pending.abandon(ticket).await;
                    warn!(%id, %client_id, error = %e, "channel send failed");
                    return (
                        DispatchOutcome::DispatchFailed,
                        MockResponse::dispatch_failed(id, &e.to_string()),
                    );
                }
                debug!(%id, %client_id, port = inbound_port, "request dispatched");
            }
        }

        match self.pending.wait(ticket, self.reply_timeout).await {
            Ok(response) => (DispatchOutcome::Completed, response),
            Err(WaitError::TimedOut) => {
                warn!(%id, timeout_ms = self.reply_timeout.as_millis() as u64, "reply wait timed out");
                (DispatchOutcome::TimedOut, MockResponse::timed_out(id))
            }
            Err(WaitError::Abandoned) => {
                // Only possible if the same id was registered twice, which the
                // gateway never does with fresh uuids.
                warn!(%id, "pending entry abandoned mid-wait");
                (
                    DispatchOutcome::DispatchFailed,
                    MockResponse::dispatch_failed(id, "pending entry abandoned"),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn dispatcher(mode: DispatchMode, ports: Vec<u16>) -> Dispatcher {
        Dispatcher::new(
            mode,
            ClientRegistry::new(mode, ports),
            ChannelHub::new(),
            PendingReplies::new(),
            TrafficLog::new(16),
            Duration::from_millis(200),
        )
    }

    /// Drains one forwarded frame and feeds back a canned reply, the way a
    /// connected client's read loop would.
    fn answer_requests(
        mut rx: tokio::sync::mpsc::Receiver<HarnessFrame>,
        pending: PendingReplies,
        status: u16,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let HarnessFrame::Request { request } = frame {
                    pending
                        .complete(MockResponse::text(request.id, status, "ok"))
                        .await;
                }
            }
        })
    }

    #[tokio::test]
    async fn port_mode_completes_through_the_bound_client() {
        let d = dispatcher(DispatchMode::PortPerClient, vec![5551]);
        let client_id = Uuid::new_v4();
        assert_eq!(d.registry.connect(client_id).await.unwrap(), Some(5551));
        let rx = d.hub.attach(client_id).await;
        let _client = answer_requests(rx, d.pending.clone(), 200);

        let resp = d.dispatch(MockRequest::new("GET", "/hello"), 5551).await;
        assert_eq!(resp.status, 200);

        let traffic = d.traffic.snapshot().await;
        assert_eq!(traffic.len(), 1);
        assert_eq!(traffic[0].outcome, DispatchOutcome::Completed);
        assert!(d.pending.is_empty().await);
    }

    #[tokio::test]
    async fn unbound_port_is_service_unavailable() {
        let d = dispatcher(DispatchMode::PortPerClient, vec![5551]);
        let resp = d.dispatch(MockRequest::new("GET", "/x"), 5551).await;
        assert_eq!(resp.status, 503);

        let traffic = d.traffic.snapshot().await;
        assert_eq!(traffic[0].outcome, DispatchOutcome::NoClient);
        assert!(d.pending.is_empty().await);
    }

    #[tokio::test]
    async fn broadcast_with_no_clients_is_service_unavailable() {
        let d = dispatcher(DispatchMode::Broadcast, vec![]);
        let resp = d.dispatch(MockRequest::new("GET", "/x"), 5551).await;
        assert_eq!(resp.status, 503);
        assert_eq!(d.traffic.snapshot().await[0].outcome, DispatchOutcome::NoClient);
    }

    #[tokio::test]
    async fn saturated_client_queue_is_internal_error() {
        let d = dispatcher(DispatchMode::PortPerClient, vec![5551]);
        let client_id = Uuid::new_v4();
        d.registry.connect(client_id).await.unwrap();
        // Attach but never drain, then fill the queue completely.
        let _rx = d.hub.attach(client_id).await;
        for _ in 0..crate::channel::WRITER_QUEUE_DEPTH {
            d.hub
                .send_to_one(client_id, HarnessFrame::Request {
                    request: MockRequest::new("GET", "/fill"),
                })
                .await
                .unwrap();
        }

        let resp = d.dispatch(MockRequest::new("GET", "/x"), 5551).await;
        assert_eq!(resp.status, 500);
        assert_eq!(
            d.traffic.snapshot().await[0].outcome,
            DispatchOutcome::DispatchFailed
        );
        assert!(d.pending.is_empty().await);
    }

    #[tokio::test]
    async fn silent_client_times_out_as_gateway_timeout() {
        let d = dispatcher(DispatchMode::PortPerClient, vec![5551]);
        let client_id = Uuid::new_v4();
        d.registry.connect(client_id).await.unwrap();
        // A client that receives but never answers.
        let mut rx = d.hub.attach(client_id).await;
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let resp = d.dispatch(MockRequest::new("GET", "/slow"), 5551).await;
        assert_eq!(resp.status, 504);
        assert_eq!(d.traffic.snapshot().await[0].outcome, DispatchOutcome::TimedOut);
        assert!(d.pending.is_empty().await);
        drain.abort();
    }

    #[tokio::test]
    async fn broadcast_race_first_reply_wins() {
        let d = dispatcher(DispatchMode::Broadcast, vec![]);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        d.registry.connect(a).await.unwrap();
        d.registry.connect(b).await.unwrap();
        let rx_a = d.hub.attach(a).await;
        let rx_b = d.hub.attach(b).await;
        // Both clients answer; statuses differ so the winner is observable.
        let _ca = answer_requests(rx_a, d.pending.clone(), 200);
        let _cb = answer_requests(rx_b, d.pending.clone(), 201);

        let resp = d.dispatch(MockRequest::new("GET", "/race"), 0).await;
        // Exactly one of the two replies, never a merge or an error.
        assert!(resp.status == 200 || resp.status == 201);
        assert_eq!(d.traffic.snapshot().await[0].outcome, DispatchOutcome::Completed);
        assert!(d.pending.is_empty().await);
    }

    #[tokio::test]
    async fn concurrent_dispatches_resolve_independently() {
        let d = dispatcher(DispatchMode::PortPerClient, vec![5551, 5552]);
        let fast = Uuid::new_v4();
        let slow = Uuid::new_v4();
        d.registry.connect(fast).await.unwrap(); // gets 5551
        d.registry.connect(slow).await.unwrap(); // gets 5552
        let rx_fast = d.hub.attach(fast).await;
        let _answering = answer_requests(rx_fast, d.pending.clone(), 200);
        let mut rx_slow = d.hub.attach(slow).await;
        let drain = tokio::spawn(async move { while rx_slow.recv().await.is_some() {} });

        let d2 = d.clone();
        let slow_call =
            tokio::spawn(async move { d2.dispatch(MockRequest::new("GET", "/slow"), 5552).await });

        let fast_resp = d.dispatch(MockRequest::new("GET", "/fast"), 5551).await;
        assert_eq!(fast_resp.status, 200);

        let slow_resp = slow_call.await.unwrap();
        assert_eq!(slow_resp.status, 504);
        drain.abort();
    }
}
