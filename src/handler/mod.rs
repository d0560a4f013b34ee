//! Handlers — a matcher paired with a responder.
//!
//! Handlers are built fluently and registered with a [`HandlerRegistry`]:
//!
//! ```no_run
//! use understudy::handler::Handler;
//! use understudy::model::MockResponse;
//!
//! let handler = Handler::builder()
//!     .method("GET")
//!     .route("/users/{id}")
//!     .respond_with(|req, caps| {
//!         let id = caps.get("id").unwrap_or("?").to_string();
//!         MockResponse::json(req.id, 200, &serde_json::json!({ "id": id }))
//!     })
//!     .build()
//!     .unwrap();
//! ```

mod registry;

pub use registry::{HandlerId, HandlerRegistry, Resolution};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::expr::Expr;
use crate::matcher::{BodyPredicate, MatchError, RequestMatcher, RouteCaptures, RouteTemplate};
use crate::model::{MockRequest, MockResponse};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler has no responder")]
    NoResponder,

    #[error(transparent)]
    Match(#[from] MatchError),
}

/// Boxed future produced by a [`Responder`].
pub type ResponderFuture = Pin<Box<dyn Future<Output = MockResponse> + Send + 'static>>;

/// The answering side of a handler.
///
/// One contract covers both sync and async responders: sync closures are
/// wrapped into an immediately-ready future by the builder. The returned
/// future must own everything it needs — implementations clone from the
/// borrowed request before going async.
pub trait Responder: Send + Sync + 'static {
    fn respond(&self, req: &MockRequest, captures: &RouteCaptures) -> ResponderFuture;
}

struct SyncResponder<F>(F);

impl<F> Responder for SyncResponder<F>
where
    F: Fn(&MockRequest, &RouteCaptures) -> MockResponse + Send + Sync + 'static,
{
    fn respond(&self, req: &MockRequest, captures: &RouteCaptures) -> ResponderFuture {
        let response = (self.0)(req, captures);
        Box::pin(std::future::ready(response))
    }
}

struct AsyncResponder<F>(F);

impl<F, Fut> Responder for AsyncResponder<F>
where
    F: Fn(MockRequest, RouteCaptures) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    fn respond(&self, req: &MockRequest, captures: &RouteCaptures) -> ResponderFuture {
        Box::pin((self.0)(req.clone(), captures.clone()))
    }
}

/// A registered (matcher, responder) pair.
///
/// Cheap to clone — the responder is reference-counted.
#[derive(Clone)]
pub struct Handler {
    name: Option<String>,
    matcher: RequestMatcher,
    responder: Arc<dyn Responder>,
}

impl Handler {
    pub fn builder() -> HandlerBuilder {
        HandlerBuilder::default()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Delegate to the matcher.
    pub fn matches(&self, req: &MockRequest) -> Option<RouteCaptures> {
        self.matcher.matches(req)
    }

    /// Run the responder to completion.
    pub async fn respond(&self, req: &MockRequest, captures: &RouteCaptures) -> MockResponse {
        self.responder.respond(req, captures).await
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

/// Fluent construction of an immutable [`Handler`].
///
/// Route and expression sources are parsed as they are supplied; the first
/// error is reported by [`HandlerBuilder::build`].
#[derive(Default)]
pub struct HandlerBuilder {
    name: Option<String>,
    matcher: RequestMatcher,
    responder: Option<Arc<dyn Responder>>,
    deferred_err: Option<MatchError>,
}

impl HandlerBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a method to the accepted set. No calls = any method.
    pub fn method(mut self, method: &str) -> Self {
        self.matcher.methods.push(method.to_ascii_uppercase());
        self
    }

    /// Set the route template (`/users/{id}`). No call = any path.
    pub fn route(mut self, template: &str) -> Self {
        match RouteTemplate::parse(template) {
            Ok(t) => self.matcher.route = Some(t),
            Err(e) => self.defer(e),
        }
        self
    }

    /// Require `key` to carry a value equal to `value`.
    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.matcher.headers.push((key.to_string(), value.into()));
        self
    }

    /// Require `key` to be present, with any value.
    pub fn header_exists(mut self, key: &str) -> Self {
        self.matcher.headers_exist.push(key.to_string());
        self
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.matcher.query.push((key.to_string(), value.into()));
        self
    }

    pub fn query_exists(mut self, key: &str) -> Self {
        self.matcher.query_exist.push(key.to_string());
        self
    }

    /// Require the body text to contain `needle`.
    pub fn body_contains(mut self, needle: impl Into<String>) -> Self {
        self.matcher.body.push(BodyPredicate::Contains(needle.into()));
        self
    }

    /// Require the JSON body to satisfy a boolean expression
    /// (`body.total > 100`).
    pub fn body_expr(mut self, source: &str) -> Self {
        match Expr::parse(source) {
            Ok(e) => self.matcher.body.push(BodyPredicate::Expr(e)),
            Err(e) => self.defer(e.into()),
        }
        self
    }

    /// Answer with a synchronous closure.
    pub fn respond_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&MockRequest, &RouteCaptures) -> MockResponse + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(SyncResponder(f)));
        self
    }

    /// Answer with a future-returning closure. The closure receives owned
    /// copies of the request and captures.
    pub fn respond_async<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(MockRequest, RouteCaptures) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MockResponse> + Send + 'static,
    {
        self.responder = Some(Arc::new(AsyncResponder(f)));
        self
    }

    /// Answer every match with the same canned response.
    pub fn respond_fixed(self, status: u16, content_type: &str, body: Vec<u8>) -> Self {
        let content_type = content_type.to_string();
        self.respond_with(move |req, _| {
            MockResponse::new(req.id, status)
                .with_content_type(content_type.clone())
                .with_body(body.clone())
        })
    }

    /// Install an already-built responder.
    pub fn responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn build(self) -> Result<Handler, HandlerError> {
        if let Some(e) = self.deferred_err {
            return Err(e.into());
        }
        let responder = self.responder.ok_or(HandlerError::NoResponder)?;
        Ok(Handler {
            name: self.name,
            matcher: self.matcher,
            responder,
        })
    }

    fn defer(&mut self, e: MatchError) {
        // First error wins; later ones would be consequences of the same typo.
        if self.deferred_err.is_none() {
            self.deferred_err = Some(e);
        }
    }
}
