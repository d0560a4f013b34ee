//! Client-produced (or dispatcher-synthesized) HTTP response.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// The reply relayed back to the original HTTP caller.
///
/// `id` names the request being answered. The dispatcher never inspects the
/// payload of a client-produced response; it is written back verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockResponse {
    pub id: Uuid,
    pub status: u16,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, with = "super::b64_body", skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

impl MockResponse {
    pub fn new(id: Uuid, status: u16) -> Self {
        Self {
            id,
            status,
            content_type: default_content_type(),
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Plain-text response.
    pub fn text(id: Uuid, status: u16, body: impl Into<String>) -> Self {
        Self::new(id, status).with_body(body.into().into_bytes())
    }

    /// JSON response (`application/json`).
    pub fn json(id: Uuid, status: u16, value: &serde_json::Value) -> Self {
        Self::new(id, status)
            .with_content_type("application/json")
            .with_body(value.to_string().into_bytes())
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    // ── fixed failure responses ───────────────────────────────────────────────

    /// 501 — the client had no handler for this request.
    pub fn unmatched(id: Uuid) -> Self {
        Self::json(
            id,
            501,
            &json!({ "error": "unmatched", "message": "no handler matched this request" }),
        )
    }

    /// 503 — no client is connected (or bound to the inbound port).
    pub fn no_client(id: Uuid) -> Self {
        Self::json(
            id,
            503,
            &json!({ "error": "no_client", "message": "no client is bound to this port" }),
        )
    }

    /// 500 — the request could not be handed to any client.
    pub fn dispatch_failed(id: Uuid, reason: &str) -> Self {
        Self::json(
            id,
            500,
            &json!({ "error": "dispatch_failed", "message": reason }),
        )
    }

    /// 500 — the inbound request could not be captured.
    pub fn malformed(id: Uuid, reason: &str) -> Self {
        Self::json(
            id,
            500,
            &json!({ "error": "malformed_request", "message": reason }),
        )
    }

    /// 504 — no reply arrived within the configured wait.
    pub fn timed_out(id: Uuid) -> Self {
        Self::json(
            id,
            504,
            &json!({ "error": "timeout", "message": "client did not reply in time" }),
        )
    }
}
