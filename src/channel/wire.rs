//! Frames exchanged on the client channel.
//!
//! One JSON object per line, tagged by `type`. The harness speaks
//! [`HarnessFrame`], clients answer with [`ClientFrame`].

use serde::{Deserialize, Serialize};

use crate::model::{MockRequest, MockResponse};
use crate::registry::ClientId;

/// Harness → client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HarnessFrame {
    /// First frame on every accepted connection.
    Welcome {
        client_id: ClientId,
        /// The gateway port reserved for this client; absent in broadcast mode.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
    /// The connection was not admitted; the harness closes it after this.
    Refused { reason: String },
    /// An inbound HTTP request for the client to answer.
    Request { request: MockRequest },
}

/// Client → harness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Answer to a previously forwarded request, correlated by `response.id`.
    Response { response: MockResponse },
}
