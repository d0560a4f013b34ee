//! Predicate matching — decides which handler answers a request.
//!
//! A [`RequestMatcher`] is a conjunction of conditions over one
//! [`MockRequest`]: method set, route template, header/query conditions and
//! body predicates. Every declared condition must hold. A matcher with no
//! conditions matches everything.

mod route;

pub use route::{RouteCaptures, RouteTemplate};

use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::expr::{Expr, ExprError};
use crate::model::MockRequest;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("route template error: {0}")]
    Route(String),

    #[error(transparent)]
    Expr(#[from] ExprError),
}

/// Body conditions. All declared predicates must hold.
#[derive(Debug, Clone)]
pub enum BodyPredicate {
    /// Substring search on the lossily-decoded body text.
    /// An absent or empty body never matches.
    Contains(String),
    /// Boolean expression over the JSON-parsed body (root name `body`).
    /// A body that is absent or not valid JSON never matches.
    Expr(Expr),
}

/// Conjunction of request conditions.
#[derive(Debug, Clone, Default)]
pub struct RequestMatcher {
    /// Uppercased method names; empty means any method.
    pub(crate) methods: Vec<String>,
    pub(crate) route: Option<RouteTemplate>,
    /// `(key, value)` pairs — key must exist and carry an equal value.
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) headers_exist: Vec<String>,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) query_exist: Vec<String>,
    pub(crate) body: Vec<BodyPredicate>,
}

impl RequestMatcher {
    /// A matcher with no conditions — matches every request.
    pub fn any() -> Self {
        Self::default()
    }

    /// Check the request against every condition.
    ///
    /// `Some(captures)` when all conditions hold; captures are empty unless a
    /// route template with placeholders matched.
    pub fn matches(&self, req: &MockRequest) -> Option<RouteCaptures> {
        if !self.methods.is_empty()
            && !self.methods.iter().any(|m| m.eq_ignore_ascii_case(&req.method))
        {
            return None;
        }

        let captures = match &self.route {
            Some(template) => template.matches(&req.path)?,
            None => RouteCaptures::default(),
        };

        for (key, value) in &self.headers {
            if !req.headers.contains_value(key, value) {
                return None;
            }
        }
        for key in &self.headers_exist {
            if !req.headers.contains_key(key) {
                return None;
            }
        }
        for (key, value) in &self.query {
            if !req.query.contains_value(key, value) {
                return None;
            }
        }
        for key in &self.query_exist {
            if !req.query.contains_key(key) {
                return None;
            }
        }

        for predicate in &self.body {
            if !body_matches(predicate, req) {
                return None;
            }
        }

        Some(captures)
    }
}

fn body_matches(predicate: &BodyPredicate, req: &MockRequest) -> bool {
    match predicate {
        BodyPredicate::Contains(needle) => match req.body_text() {
            Some(text) if !text.is_empty() => text.contains(needle.as_str()),
            _ => false,
        },
        BodyPredicate::Expr(expr) => {
            let Some(bytes) = req.body.as_deref() else {
                return false;
            };
            let parsed: Value = match serde_json::from_slice(bytes) {
                Ok(v) => v,
                Err(e) => {
                    debug!(request_id = %req.id, error = %e, "body is not JSON; expression does not match");
                    return false;
                }
            };
            match expr.eval(&json!({ "body": parsed })) {
                Ok(matched) => matched,
                Err(e) => {
                    debug!(request_id = %req.id, expr = %expr, error = %e, "expression evaluation failed; treating as no match");
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> RequestMatcher {
        RequestMatcher::any()
    }

    #[test]
    fn empty_matcher_matches_anything() {
        let req = MockRequest::new("DELETE", "/whatever").with_body(b"x".to_vec());
        assert!(matcher().matches(&req).is_some());
    }

    #[test]
    fn method_set_is_case_insensitive_and_empty_means_any() {
        let mut m = matcher();
        m.methods = vec!["GET".into(), "HEAD".into()];
        assert!(m.matches(&MockRequest::new("get", "/")).is_some());
        assert!(m.matches(&MockRequest::new("POST", "/")).is_none());

        let any = matcher();
        assert!(any.matches(&MockRequest::new("PATCH", "/")).is_some());
    }

    #[test]
    fn route_captures_flow_through() {
        let mut m = matcher();
        m.route = Some(RouteTemplate::parse("/users/{id}").unwrap());
        let caps = m.matches(&MockRequest::new("GET", "/users/42")).unwrap();
        assert_eq!(caps.get("id"), Some("42"));
        assert!(m.matches(&MockRequest::new("GET", "/orders/42")).is_none());
    }

    #[test]
    fn header_condition_requires_an_equal_value() {
        let mut m = matcher();
        m.headers = vec![("x-api-key".into(), "sekrit".into())];
        let hit = MockRequest::new("GET", "/").with_header("X-Api-Key", "sekrit");
        let miss_value = MockRequest::new("GET", "/").with_header("X-Api-Key", "other");
        let miss_key = MockRequest::new("GET", "/");
        assert!(m.matches(&hit).is_some());
        assert!(m.matches(&miss_value).is_none());
        assert!(m.matches(&miss_key).is_none());
    }

    #[test]
    fn exists_condition_checks_presence_only() {
        let mut m = matcher();
        m.headers_exist = vec!["authorization".into()];
        let hit = MockRequest::new("GET", "/").with_header("Authorization", "Bearer t");
        assert!(m.matches(&hit).is_some());
        assert!(m.matches(&MockRequest::new("GET", "/")).is_none());
    }

    #[test]
    fn query_conditions() {
        let mut m = matcher();
        m.query = vec![("page".into(), "2".into())];
        m.query_exist = vec!["sort".into()];
        let hit = MockRequest::new("GET", "/")
            .with_query("Page", "2")
            .with_query("SORT", "asc");
        assert!(m.matches(&hit).is_some());
        let miss = MockRequest::new("GET", "/").with_query("page", "2");
        assert!(m.matches(&miss).is_none());
    }

    #[test]
    fn body_contains_fails_on_empty_or_absent_body() {
        let mut m = matcher();
        m.body = vec![BodyPredicate::Contains("hello".into())];
        assert!(m.matches(&MockRequest::new("POST", "/")).is_none());
        let empty = MockRequest::new("POST", "/").with_body(vec![]);
        assert!(m.matches(&empty).is_none());
        let hit = MockRequest::new("POST", "/").with_body(b"well hello there".to_vec());
        assert!(m.matches(&hit).is_some());
    }

    #[test]
    fn body_expr_matches_parsed_json() {
        let mut m = matcher();
        m.body = vec![BodyPredicate::Expr(Expr::parse("body.total > 100").unwrap())];
        let hit = MockRequest::new("POST", "/").with_body(br#"{"total": 150}"#.to_vec());
        let miss = MockRequest::new("POST", "/").with_body(br#"{"total": 50}"#.to_vec());
        assert!(m.matches(&hit).is_some());
        assert!(m.matches(&miss).is_none());
    }

    #[test]
    fn body_expr_on_malformed_json_is_no_match() {
        let mut m = matcher();
        m.body = vec![BodyPredicate::Expr(Expr::parse("body.total > 100").unwrap())];
        let req = MockRequest::new("POST", "/").with_body(b"{not json".to_vec());
        assert!(m.matches(&req).is_none());
    }

    #[test]
    fn all_conditions_are_anded() {
        let mut m = matcher();
        m.methods = vec!["POST".into()];
        m.route = Some(RouteTemplate::parse("/orders").unwrap());
        m.headers = vec![("content-type".into(), "application/json".into())];
        m.body = vec![
            BodyPredicate::Contains("sku".into()),
            BodyPredicate::Expr(Expr::parse("body.qty >= 1").unwrap()),
        ];

        let hit = MockRequest::new("POST", "/orders")
            .with_header("Content-Type", "application/json")
            .with_body(br#"{"sku": "A1", "qty": 2}"#.to_vec());
        assert!(m.matches(&hit).is_some());

        let wrong_qty = MockRequest::new("POST", "/orders")
            .with_header("Content-Type", "application/json")
            .with_body(br#"{"sku": "A1", "qty": 0}"#.to_vec());
        assert!(m.matches(&wrong_qty).is_none());
    }
}
