//! HTTP gateway — the surface callers under test actually hit.
//!
//! One axum listener per configured port. A reserved admin prefix serves
//! health and inspection endpoints without dispatching; every other
//! method/path is captured into a [`MockRequest`] and handed to the
//! [`Dispatcher`]. Ports that fail to bind are logged and skipped; startup
//! fails only if none bind.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::error::HarnessError;
use crate::model::{MockRequest, MockResponse, MultiMap};
use crate::registry::ClientRegistry;
use crate::traffic::TrafficLog;

/// Administrative namespace; nothing under it is ever dispatched.
pub const ADMIN_PREFIX: &str = "/__understudy";

/// Largest request body the gateway will read.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Shared state injected into every gateway handler.
///
/// Cheap to clone — all fields are reference-counted handles.
#[derive(Clone)]
pub(crate) struct GatewayState {
    /// The port this listener is bound to; the dispatcher resolves the
    /// routing target from it in port-per-client mode.
    pub port: u16,
    pub dispatcher: Dispatcher,
    pub registry: ClientRegistry,
    pub traffic: TrafficLog,
}

/// A successfully bound gateway listener, not yet serving.
pub struct BoundListener {
    pub port: u16,
    listener: TcpListener,
}

/// Bind every configured port, skipping (and logging) failures.
///
/// Port `0` binds an ephemeral port; the resolved port is reported back so
/// the registry pool and tests see the real number.
pub async fn bind(ports: &[u16]) -> Result<Vec<BoundListener>, HarnessError> {
    let mut bound = Vec::new();
    for &port in ports {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                let actual = listener
                    .local_addr()
                    .map_err(|e| HarnessError::Gateway(format!("local_addr failed: {e}")))?
                    .port();
                info!(port = actual, "gateway listening");
                bound.push(BoundListener { port: actual, listener });
            }
            Err(e) => {
                warn!(port, error = %e, "gateway port skipped (bind failed)");
            }
        }
    }
    if bound.is_empty() {
        return Err(HarnessError::Gateway(
            "no gateway port could be bound".into(),
        ));
    }
    Ok(bound)
}

/// Serve every bound listener until `shutdown` is cancelled.
pub fn serve(
    listeners: Vec<BoundListener>,
    dispatcher: Dispatcher,
    registry: ClientRegistry,
    traffic: TrafficLog,
    shutdown: CancellationToken,
) {
    for BoundListener { port, listener } in listeners {
        let state = GatewayState {
            port,
            dispatcher: dispatcher.clone(),
            registry: registry.clone(),
            traffic: traffic.clone(),
        };
        let router = build_router(state);
        let tok = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { tok.cancelled().await })
                .await
            {
                warn!(port, error = %e, "gateway server error");
            }
            info!(port, "gateway listener shut down");
        });
    }
}

pub(crate) fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route(&format!("{ADMIN_PREFIX}/health"), get(admin_health))
        .route(&format!("{ADMIN_PREFIX}/clients"), get(admin_clients))
        .route(&format!("{ADMIN_PREFIX}/traffic"), get(admin_traffic))
        // The rest of the reserved namespace 404s without dispatching.
        .route(ADMIN_PREFIX, axum::routing::any(admin_not_found))
        .route(
            &format!("{ADMIN_PREFIX}/{{*rest}}"),
            axum::routing::any(admin_not_found),
        )
        .fallback(capture_and_dispatch)
        .with_state(state)
}

// ── admin handlers ────────────────────────────────────────────────────────────

/// GET /__understudy/health — liveness probe, bypasses dispatch entirely.
async fn admin_health(State(state): State<GatewayState>) -> Response {
    let body = json!({
        "status": "ok",
        "clients": state.registry.client_count().await,
        "port": state.port,
        "time_ms": Utc::now().timestamp_millis(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// GET /__understudy/clients — connected clients and their ports.
async fn admin_clients(State(state): State<GatewayState>) -> Response {
    let clients = state.registry.snapshot().await;
    (StatusCode::OK, Json(json!({ "clients": clients }))).into_response()
}

/// GET /__understudy/traffic — recent exchanges, oldest first.
async fn admin_traffic(State(state): State<GatewayState>) -> Response {
    let exchanges = state.traffic.snapshot().await;
    (StatusCode::OK, Json(json!({ "exchanges": exchanges }))).into_response()
}

async fn admin_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "not_found", "message": "unknown admin path" })),
    )
        .into_response()
}

// ── dispatch path ─────────────────────────────────────────────────────────────

/// Capture the raw HTTP request and run it through the dispatcher.
async fn capture_and_dispatch(State(state): State<GatewayState>, req: Request) -> Response {
    let id = Uuid::new_v4();
    let mock = match capture(id, req).await {
        Ok(mock) => mock,
        Err(reason) => {
            warn!(%id, %reason, "malformed request refused before dispatch");
            return render(MockResponse::malformed(id, &reason));
        }
    };
    debug!(%id, method = %mock.method, path = %mock.path, port = state.port, "request captured");
    render(state.dispatcher.dispatch(mock, state.port).await)
}

/// Freeze the raw HTTP parts into an immutable [`MockRequest`].
async fn capture(id: Uuid, req: Request) -> Result<MockRequest, String> {
    let (parts, body) = req.into_parts();

    let method = parts.method.as_str().to_ascii_uppercase();
    let path = parts.uri.path().to_string();
    let raw_query = parts.uri.query().map(str::to_string);

    let mut headers = MultiMap::new();
    for (name, value) in &parts.headers {
        headers.insert(
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }

    let authority = headers.first("host").unwrap_or_default().to_string();
    let query = parse_query(raw_query.as_deref());
    let cookies = parse_cookies(headers.get_all("cookie"));

    let bytes: Bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| format!("body read failed: {e}"))?;
    // An empty read only counts as a body if the caller declared one.
    let body = if !bytes.is_empty() {
        Some(bytes.to_vec())
    } else if headers.contains_key("content-length") || headers.contains_key("transfer-encoding") {
        Some(Vec::new())
    } else {
        None
    };

    Ok(MockRequest {
        id,
        method,
        authority,
        path,
        raw_query,
        headers,
        query,
        cookies,
        body,
        received_at: Utc::now(),
    })
}

/// Split a raw query string into a decoded multimap.
fn parse_query(raw: Option<&str>) -> MultiMap {
    let mut map = MultiMap::new();
    let Some(raw) = raw else { return map };
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        map.insert(&percent_decode(key), percent_decode(value));
    }
    map
}

/// Cookie pairs from every `Cookie` header value.
fn parse_cookies(values: &[String]) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for value in values {
        for pair in value.split(';') {
            if let Some((name, v)) = pair.split_once('=') {
                cookies.insert(name.trim().to_string(), v.trim().to_string());
            }
        }
    }
    cookies
}

/// Minimal percent-decoding for query components; `+` becomes a space.
/// Invalid escapes pass through untouched.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match (hex_val(bytes.get(i + 1)), hex_val(bytes.get(i + 2))) {
                (Some(hi), Some(lo)) => {
                    out.push(hi * 16 + lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: Option<&u8>) -> Option<u8> {
    (*b? as char).to_digit(16).map(|d| d as u8)
}

/// Write a [`MockResponse`] back to the HTTP caller verbatim.
fn render(resp: MockResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut headers = HeaderMap::new();
    if let Ok(ct) = HeaderValue::from_str(&resp.content_type) {
        headers.insert(header::CONTENT_TYPE, ct);
    }
    for (name, value) in &resp.headers {
        match (name.parse::<HeaderName>(), HeaderValue::from_str(value)) {
            (Ok(n), Ok(v)) => {
                headers.insert(n, v);
            }
            _ => warn!(header = %name, "unwritable response header skipped"),
        }
    }
    let body = axum::body::Body::from(resp.body.unwrap_or_default());
    (status, headers, body).into_response()
}
