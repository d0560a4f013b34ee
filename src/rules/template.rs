//! `{{ placeholder }}` rendering against a matched request.
//!
//! Placeholders are bare paths rooted at one of `body`, `headers`, `query`
//! or `route` (`{{ body.user.name }}`, `{{ headers.x-trace }}`,
//! `{{ route.id }}`). Multi-valued keys render their first value; an
//! unresolvable placeholder renders empty and logs at debug.

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::expr::lookup_path;
use crate::matcher::RouteCaptures;
use crate::model::{MockRequest, MultiMap};

/// Render every `{{ path }}` occurrence in `template`.
pub fn render(template: &str, req: &MockRequest, captures: &RouteCaptures) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    let root = template_root(req, captures);

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let path = after[..close].trim();
                out.push_str(&resolve(&root, path));
                rest = &after[close + 2..];
            }
            None => {
                // Unterminated placeholder: emit literally.
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// The JSON object placeholder paths are resolved against.
fn template_root(req: &MockRequest, captures: &RouteCaptures) -> Value {
    let body = req
        .body_text()
        .and_then(|text| serde_json::from_str::<Value>(&text).ok())
        .unwrap_or(Value::Null);
    json!({
        "body": body,
        "headers": first_values(&req.headers),
        "query": first_values(&req.query),
        "route": captures.to_json(),
    })
}

fn first_values(map: &MultiMap) -> Value {
    let mut obj = Map::new();
    for (key, values) in map.iter() {
        if let Some(first) = values.first() {
            obj.insert(key.to_string(), Value::String(first.clone()));
        }
    }
    Value::Object(obj)
}

fn resolve(root: &Value, path: &str) -> String {
    match lookup_path(root, path) {
        Ok(Value::String(s)) => s.clone(),
        Ok(Value::Null) => {
            debug!(%path, "template placeholder resolved to nothing");
            String::new()
        }
        Ok(value) => value.to_string(),
        Err(e) => {
            debug!(%path, error = %e, "bad template placeholder");
            String::new()
        }
    }
}
