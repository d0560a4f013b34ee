//! Test-side stub client.
//!
//! A [`StubClient`] connects to the harness channel, owns a
//! [`HandlerRegistry`], and answers forwarded requests from it. Requests no
//! registered handler matches are answered with the fixed 501 response, so
//! the HTTP caller always gets a reply through the normal completion path.
//!
//! ```no_run
//! use understudy::client::StubClient;
//! use understudy::handler::Handler;
//! use understudy::model::MockResponse;
//!
//! # async fn demo() -> Result<(), understudy::client::ClientError> {
//! let client = StubClient::connect("127.0.0.1:4540").await?;
//! client
//!     .register(
//!         Handler::builder()
//!             .method("GET")
//!             .route("/users/{id}")
//!             .respond_with(|req, caps| {
//!                 MockResponse::text(req.id, 200, caps.get("id").unwrap_or(""))
//!             })
//!             .build()
//!             .unwrap(),
//!     )
//!     .await;
//! println!("answering on port {:?}", client.port());
//! # Ok(())
//! # }
//! ```

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{ClientFrame, HarnessFrame};
use crate::handler::{Handler, HandlerId, HandlerRegistry};
use crate::model::{MockRequest, MockResponse};
use crate::registry::ClientId;

/// Outbound replies queued before the writer applies backpressure.
const REPLY_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("harness refused the connection: {0}")]
    Refused(String),

    #[error("unexpected frame during handshake: {0}")]
    Protocol(String),

    #[error("connection closed during handshake")]
    Closed,
}

/// A connected stub client.
///
/// Dropping the client (or calling [`StubClient::close`]) tears the
/// connection down; the harness observes a normal disconnect and frees any
/// reserved port.
pub struct StubClient {
    client_id: ClientId,
    port: Option<u16>,
    handlers: HandlerRegistry,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for StubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubClient")
            .field("client_id", &self.client_id)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl StubClient {
    /// Connect to the harness channel and complete the handshake.
    ///
    /// In port-per-client mode the returned client knows its reserved
    /// gateway port; pool exhaustion surfaces as [`ClientError::Refused`].
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let first = lines
            .next_line()
            .await?
            .ok_or(ClientError::Closed)?;
        let (client_id, port) = match serde_json::from_str::<HarnessFrame>(&first) {
            Ok(HarnessFrame::Welcome { client_id, port }) => (client_id, port),
            Ok(HarnessFrame::Refused { reason }) => return Err(ClientError::Refused(reason)),
            Ok(other) => {
                return Err(ClientError::Protocol(format!("{other:?}")));
            }
            Err(e) => return Err(ClientError::Protocol(e.to_string())),
        };
        info!(%client_id, ?port, "connected to harness");

        let handlers = HandlerRegistry::new();
        let shutdown = CancellationToken::new();
        let (reply_tx, reply_rx) = mpsc::channel(REPLY_QUEUE_DEPTH);

        tokio::spawn(write_loop(writer, reply_rx));
        tokio::spawn(read_loop(
            lines,
            handlers.clone(),
            reply_tx,
            shutdown.clone(),
        ));

        Ok(Self { client_id, port, handlers, shutdown })
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// The gateway port this client answers on; `None` in broadcast mode.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The handler registry backing this client. Registrations take effect
    /// immediately, including while requests are in flight.
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Convenience for `handlers().register(...)`.
    pub async fn register(&self, handler: Handler) -> HandlerId {
        self.handlers.register(handler).await
    }

    /// Tear the connection down. Requests already forwarded here will time
    /// out on the harness side.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for StubClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut replies: mpsc::Receiver<ClientFrame>) {
    while let Some(frame) = replies.recv().await {
        let mut json = match serde_json::to_string(&frame) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "reply serialise error; dropped");
                continue;
            }
        };
        json.push('\n');
        if writer.write_all(json.as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn read_loop(
    mut lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    handlers: HandlerRegistry,
    replies: mpsc::Sender<ClientFrame>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            line = lines.next_line() => {
                match line {
                    Ok(None) => {
                        info!("harness closed the channel");
                        break;
                    }
                    Ok(Some(l)) if l.trim().is_empty() => continue,
                    Ok(Some(l)) => match serde_json::from_str::<HarnessFrame>(&l) {
                        Ok(HarnessFrame::Request { request }) => {
                            // Answer concurrently so one slow responder
                            // does not serialise the rest.
                            let handlers = handlers.clone();
                            let replies = replies.clone();
                            tokio::spawn(answer(request, handlers, replies));
                        }
                        Ok(other) => {
                            debug!(frame = ?other, "ignoring non-request frame");
                        }
                        Err(e) => {
                            warn!(error = %e, "unparseable harness frame ignored");
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "channel read error");
                        break;
                    }
                }
            }
        }
    }
    shutdown.cancel();
}

async fn answer(request: MockRequest, handlers: HandlerRegistry, replies: mpsc::Sender<ClientFrame>) {
    let id = request.id;
    let response = match handlers.resolve(&request).await {
        Some(resolution) => {
            debug!(%id, handler = ?resolution.handler.name(), "request matched");
            resolution.handler.respond(&request, &resolution.captures).await
        }
        None => {
            debug!(%id, method = %request.method, path = %request.path, "no handler matched");
            MockResponse::unmatched(id)
        }
    };
    if replies
        .send(ClientFrame::Response { response })
        .await
        .is_err()
    {
        warn!(%id, "reply dropped: connection is closing");
    }
}
