//! Declarative stub files — TOML rules loaded into [`Handler`]s.
//!
//! A rule file holds an ordered list of `[[stub]]` tables. Later stubs win
//! over earlier ones for overlapping conditions, matching the registry's
//! last-registered-wins semantics. Response bodies and header values
//! support `{{ body.x }}` / `{{ headers.y }}` / `{{ query.z }}` /
//! `{{ route.id }}` templating against the matched request.
//!
//! ```toml
//! [[stub]]
//! name = "get-user"
//! methods = ["GET"]
//! route = "/users/{id}"
//!
//! [stub.match]
//! headers_exist = ["authorization"]
//!
//! [stub.response]
//! status = 200
//! content_type = "application/json"
//! body = '{"id": "{{ route.id }}"}'
//! ```

mod template;

pub use template::render;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::handler::{Handler, HandlerError};
use crate::model::MockResponse;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("cannot read rule file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("rule file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("stub '{name}': {source}")]
    Stub {
        name: String,
        #[source]
        source: HandlerError,
    },
}

#[derive(Debug, Default, Deserialize)]
struct RuleFile {
    #[serde(default, rename = "stub")]
    stubs: Vec<Stub>,
}

#[derive(Debug, Deserialize)]
struct Stub {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    methods: Vec<String>,
    #[serde(default)]
    route: Option<String>,
    #[serde(default, rename = "match")]
    conditions: MatchSpec,
    response: ResponseSpec,
}

#[derive(Debug, Default, Deserialize)]
struct MatchSpec {
    /// Exact header conditions; BTreeMap keeps build order deterministic.
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    headers_exist: Vec<String>,
    #[serde(default)]
    query: BTreeMap<String, String>,
    #[serde(default)]
    query_exist: Vec<String>,
    #[serde(default)]
    body_contains: Vec<String>,
    #[serde(default)]
    body_expr: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseSpec {
    #[serde(default = "default_status")]
    status: u16,
    #[serde(default = "default_content_type")]
    content_type: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<String>,
}

fn default_status() -> u16 {
    200
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

/// Load a rule file into handlers, in file order.
///
/// Register them in the returned order so the file's last stub has the
/// highest precedence.
pub fn load_rules(path: &Path) -> Result<Vec<Handler>, RuleError> {
    let raw = std::fs::read_to_string(path).map_err(|source| RuleError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let file: RuleFile = toml::from_str(&raw).map_err(|source| RuleError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    let mut handlers = Vec::with_capacity(file.stubs.len());
    for (index, stub) in file.stubs.into_iter().enumerate() {
        let name = stub
            .name
            .clone()
            .unwrap_or_else(|| format!("stub#{index}"));
        handlers.push(build_handler(&name, stub).map_err(|source| RuleError::Stub {
            name: name.clone(),
            source,
        })?);
    }
    info!(path = %path.display(), count = handlers.len(), "rule file loaded");
    Ok(handlers)
}

fn build_handler(name: &str, stub: Stub) -> Result<Handler, HandlerError> {
    let mut builder = Handler::builder().name(name);
    for method in &stub.methods {
        builder = builder.method(method);
    }
    if let Some(route) = &stub.route {
        builder = builder.route(route);
    }
    for (key, value) in &stub.conditions.headers {
        builder = builder.header(key, value.clone());
    }
    for key in &stub.conditions.headers_exist {
        builder = builder.header_exists(key);
    }
    for (key, value) in &stub.conditions.query {
        builder = builder.query(key, value.clone());
    }
    for key in &stub.conditions.query_exist {
        builder = builder.query_exists(key);
    }
    for needle in &stub.conditions.body_contains {
        builder = builder.body_contains(needle.clone());
    }
    for source in &stub.conditions.body_expr {
        builder = builder.body_expr(source);
    }

    let spec = stub.response;
    builder
        .respond_with(move |req, captures| {
            let mut resp = MockResponse::new(req.id, spec.status)
                .with_content_type(spec.content_type.clone());
            for (key, value) in &spec.headers {
                resp = resp.with_header(key.clone(), render(value, req, captures));
            }
            if let Some(body) = &spec.body {
                resp = resp.with_body(render(body, req, captures).into_bytes());
            }
            resp
        })
        .build()
}
