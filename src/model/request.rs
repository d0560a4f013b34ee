//! Captured HTTP request as delivered to clients.

use std::borrow::Cow;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MultiMap;

/// One inbound HTTP request, frozen at the moment the gateway accepted it.
///
/// The `id` doubles as the correlation id: the reply a client sends back
/// must carry the same value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockRequest {
    pub id: Uuid,
    /// Uppercased HTTP method (`GET`, `POST`, …).
    pub method: String,
    /// Host (and port) the caller addressed, from the `Host` header.
    #[serde(default)]
    pub authority: String,
    /// Decoded path, always starting with `/`.
    pub path: String,
    /// Query string exactly as received, without the leading `?`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_query: Option<String>,
    #[serde(default)]
    pub headers: MultiMap,
    /// Query parameters decoded from `raw_query`.
    #[serde(default)]
    pub query: MultiMap,
    /// Cookie pairs parsed from the `Cookie` header. Names keep their case.
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    /// Raw body bytes. `None` when the request carried no body.
    #[serde(default, with = "super::b64_body", skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub received_at: DateTime<Utc>,
}

impl MockRequest {
    /// Fresh request with a new id and the current timestamp.
    ///
    /// Mainly for tests and client-side handler exercises; the gateway builds
    /// requests from the raw HTTP parts instead.
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.to_ascii_uppercase(),
            authority: String::new(),
            path: path.to_string(),
            raw_query: None,
            headers: MultiMap::new(),
            query: MultiMap::new(),
            cookies: HashMap::new(),
            body: None,
            received_at: now_millis(),
        }
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.insert(key, value);
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Body decoded as UTF-8 (lossily). `None` when there is no body.
    pub fn body_text(&self) -> Option<Cow<'_, str>> {
        self.body.as_deref().map(String::from_utf8_lossy)
    }
}

/// Current time truncated to millisecond precision, matching the wire format.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
