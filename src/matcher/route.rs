//! Route templates with `{name}` placeholder segments.

use std::collections::HashMap;

use serde_json::Value;

use super::MatchError;

/// A parsed path pattern like `/users/{id}/orders`.
///
/// Matching compares segment by segment: literal segments are compared
/// case-insensitively, placeholder segments capture the request's segment
/// under the placeholder name. Segment counts must be equal; leading and
/// trailing slashes are insignificant (`/users/` matches `/users`).
#[derive(Debug, Clone)]
pub struct RouteTemplate {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    /// Lowercased literal segment.
    Literal(String),
    /// Placeholder name, original case preserved.
    Capture(String),
}

/// Placeholder values extracted by a successful route match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteCaptures {
    values: HashMap<String, String>,
}

impl RouteCaptures {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Captures as a JSON object, for templating roots.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }
}

impl RouteTemplate {
    pub fn parse(template: &str) -> Result<Self, MatchError> {
        let mut segments = Vec::new();
        let mut seen_names: Vec<String> = Vec::new();

        for raw in split_segments(template) {
            if let Some(inner) = raw.strip_prefix('{') {
                let Some(name) = inner.strip_suffix('}') else {
                    return Err(MatchError::Route(format!(
                        "unclosed placeholder in segment '{raw}'"
                    )));
                };
                if name.is_empty() {
                    return Err(MatchError::Route("empty placeholder '{}'".into()));
                }
                if name.contains('{') || name.contains('}') {
                    return Err(MatchError::Route(format!(
                        "nested braces in placeholder '{raw}'"
                    )));
                }
                if seen_names.iter().any(|n| n == name) {
                    return Err(MatchError::Route(format!(
                        "duplicate placeholder '{{{name}}}'"
                    )));
                }
                seen_names.push(name.to_string());
                segments.push(Segment::Capture(name.to_string()));
            } else if raw.contains('{') || raw.contains('}') {
                return Err(MatchError::Route(format!(
                    "placeholder must span the whole segment: '{raw}'"
                )));
            } else {
                segments.push(Segment::Literal(raw.to_ascii_lowercase()));
            }
        }

        Ok(Self { source: template.to_string(), segments })
    }

    /// Match a decoded request path. `None` when the path does not fit.
    pub fn matches(&self, path: &str) -> Option<RouteCaptures> {
        let parts: Vec<&str> = split_segments(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut captures = RouteCaptures::default();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) => {
                    if !lit.eq_ignore_ascii_case(part) {
                        return None;
                    }
                }
                Segment::Capture(name) => {
                    captures.values.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(captures)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Path segments with leading/trailing slashes stripped. `/` yields nothing.
fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.trim_matches('/');
    trimmed.split('/').filter(move |_| !trimmed.is_empty())
}
