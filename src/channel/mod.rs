//! Client message channel — TCP listener speaking newline-delimited JSON.
//!
//! One connection per test client. On accept the harness registers the
//! client (reserving a gateway port in port-per-client mode) and sends a
//! `welcome` frame; if no port is free the client gets a `refused` frame
//! and the connection closes. Afterwards the connection carries `request`
//! frames out and `response` frames back in, each a single JSON line.
//!
//! Each connection runs two tasks: a writer draining the hub's per-client
//! queue and a reader feeding replies into the pending store. EOF or a read
//! error is the disconnect notification — the registry entry is removed and
//! the reserved port returns to the pool.

mod hub;
mod wire;

pub use hub::{ChannelHub, HubError, WRITER_QUEUE_DEPTH};
pub use wire::{ClientFrame, HarnessFrame};

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::net::tcp::OwnedWriteHalf;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use tracing::{debug, info, warn};

use crate::error::HarnessError;
use crate::pending::PendingReplies;
use crate::registry::ClientRegistry;

/// The accepting side of the client channel.
pub struct ChannelServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ChannelServer {
    /// Bind the channel listener. `127.0.0.1:0` picks an ephemeral port.
    pub async fn bind(addr: &str) -> Result<Self, HarnessError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HarnessError::Channel(format!("bind failed on {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| HarnessError::Channel(format!("local_addr failed: {e}")))?;
        Ok(Self { listener, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the accept loop until `shutdown` is cancelled.
    pub fn start(
        self,
        registry: ClientRegistry,
        hub: ChannelHub,
        pending: PendingReplies,
        shutdown: CancellationToken,
    ) {
        info!(addr = %self.local_addr, "client channel listening");
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        info!("client channel shutting down");
                        break;
                    }

                    result = self.listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                debug!(%peer, "channel connection accepted");
                                let registry = registry.clone();
                                let hub = hub.clone();
                                let pending = pending.clone();
                                let tok = shutdown.clone();
                                tokio::spawn(handle_connection(
                                    stream, registry, hub, pending, tok,
                                ));
                            }
                            Err(e) => {
                                warn!(error = %e, "channel accept error");
                            }
                        }
                    }
                }
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: ClientRegistry,
    hub: ChannelHub,
    pending: PendingReplies,
    shutdown: CancellationToken,
) {
    let client_id = Uuid::new_v4();
    let (reader, mut writer) = stream.into_split();

    // Admission first: a refused client never enters the hub.
    let port = match registry.connect(client_id).await {
        Ok(port) => port,
        Err(e) => {
            let frame = HarnessFrame::Refused { reason: e.to_string() };
            let _ = write_frame(&mut writer, &frame).await;
            return;
        }
    };

    if write_frame(&mut writer, &HarnessFrame::Welcome { client_id, port })
        .await
        .is_err()
    {
        registry.disconnect(client_id).await;
        return;
    }

    let mut outbound = hub.attach(client_id).await;
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if write_frame(&mut writer, &frame).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            line = lines.next_line() => {
                match line {
                    Ok(None) => break, // client closed the connection
                    Ok(Some(l)) if l.trim().is_empty() => continue,
                    Ok(Some(l)) => match serde_json::from_str::<ClientFrame>(&l) {
                        Ok(ClientFrame::Response { response }) => {
                            // Stale replies are dropped inside the store.
                            pending.complete(response).await;
                        }
                        Err(e) => {
                            warn!(%client_id, error = %e, "unparseable client frame ignored");
                        }
                    },
                    Err(e) => {
                        debug!(%client_id, error = %e, "channel connection read error");
                        break;
                    }
                }
            }
        }
    }

    // Detach drops the hub's sender, which ends the writer task once the
    // queue drains.
    hub.detach(client_id).await;
    registry.disconnect(client_id).await;
    let _ = writer_task.await;
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &HarnessFrame) -> std::io::Result<()> {
    let mut json = serde_json::to_string(frame).map_err(std::io::Error::other)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchMode;
    use crate::model::{MockRequest, MockResponse};
    use std::time::Duration;

    struct TestChannel {
        addr: SocketAddr,
        registry: ClientRegistry,
        hub: ChannelHub,
        pending: PendingReplies,
        shutdown: CancellationToken,
    }

    async fn start_channel(mode: DispatchMode, ports: Vec<u16>) -> TestChannel {
        let server = ChannelServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let registry = ClientRegistry::new(mode, ports);
        let hub = ChannelHub::new();
        let pending = PendingReplies::new();
        let shutdown = CancellationToken::new();
        server.start(registry.clone(), hub.clone(), pending.clone(), shutdown.clone());
        TestChannel { addr, registry, hub, pending, shutdown }
    }

    async fn read_frame(lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>) -> HarnessFrame {
        let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .expect("frame arrives in time")
            .unwrap()
            .expect("connection still open");
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn connect_receives_welcome_with_port() {
        let ch = start_channel(DispatchMode::PortPerClient, vec![5551]).await;
        let stream = TcpStream::connect(ch.addr).await.unwrap();
        let (reader, _writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        match read_frame(&mut lines).await {
            HarnessFrame::Welcome { port, .. } => assert_eq!(port, Some(5551)),
            other => panic!("expected welcome, got {other:?}"),
        }
        ch.shutdown.cancel();
    }

    #[tokio::test]
    async fn exhausted_pool_refuses_the_second_client() {
        let ch = start_channel(DispatchMode::PortPerClient, vec![5551]).await;

        let first = TcpStream::connect(ch.addr).await.unwrap();
        let (reader1, _w1) = first.into_split();
        let mut lines1 = BufReader::new(reader1).lines();
        assert!(matches!(read_frame(&mut lines1).await, HarnessFrame::Welcome { .. }));

        let second = TcpStream::connect(ch.addr).await.unwrap();
        let (reader2, _w2) = second.into_split();
        let mut lines2 = BufReader::new(reader2).lines();
        match read_frame(&mut lines2).await {
            HarnessFrame::Refused { reason } => assert!(reason.contains("port")),
            other => panic!("expected refused, got {other:?}"),
        }

        // Only the admitted client is registered.
        assert_eq!(ch.registry.client_count().await, 1);
        ch.shutdown.cancel();
    }

    #[tokio::test]
    async fn forwarded_request_and_reply_roundtrip() {
        let ch = start_channel(DispatchMode::Broadcast, vec![]).await;
        let stream = TcpStream::connect(ch.addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let HarnessFrame::Welcome { .. } = read_frame(&mut lines).await else {
            panic!("expected welcome");
        };

        // Wait for the hub attach, then forward a request.
        while ch.hub.client_count().await == 0 {
            tokio::task::yield_now().await;
        }
        let req = MockRequest::new("GET", "/ping");
        let ticket = ch.pending.register(req.id).await;
        assert_eq!(
            ch.hub.send_to_all(HarnessFrame::Request { request: req.clone() }).await,
            1
        );

        match read_frame(&mut lines).await {
            HarnessFrame::Request { request } => assert_eq!(request.id, req.id),
            other => panic!("expected request, got {other:?}"),
        }

        // Reply from the client side resolves the pending wait.
        let reply = ClientFrame::Response { response: MockResponse::text(req.id, 200, "pong") };
        let mut json = serde_json::to_string(&reply).unwrap();
        json.push('\n');
        writer.write_all(json.as_bytes()).await.unwrap();

        let got = ch.pending.wait(ticket, Duration::from_secs(2)).await.unwrap();
        assert_eq!(got.status, 200);
        ch.shutdown.cancel();
    }

    #[tokio::test]
    async fn disconnect_releases_the_client() {
        let ch = start_channel(DispatchMode::PortPerClient, vec![5551]).await;
        {
            let stream = TcpStream::connect(ch.addr).await.unwrap();
            let (reader, _writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            assert!(matches!(read_frame(&mut lines).await, HarnessFrame::Welcome { .. }));
            // Dropping both halves closes the connection.
        }

        let mut events = ch.registry.subscribe();
        // The registry may already be empty; poll until the disconnect lands.
        tokio::time::timeout(Duration::from_secs(2), async {
            while ch.registry.client_count().await > 0 {
                let _ = tokio::time::timeout(Duration::from_millis(20), events.recv()).await;
            }
        })
        .await
        .expect("disconnect observed");

        assert_eq!(ch.registry.client_for_port(5551).await, None);
        ch.shutdown.cancel();
    }
}
