//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the place for
//! cross-cutting concerns. A [`Middleware`] turns one handler into another;
//! a [`Chain`] is an ordered list of them, folded once at startup around a
//! terminal handler.
//!
//! # Ordering
//!
//! The first layer added is the outermost. For
//!
//! ```rust
//! use std::sync::Arc;
//! use gatehouse::{Method, RequestIdAllocator};
//! use gatehouse::middleware::{Chain, MethodFilter, RequestIdAssigner, RequestLogger};
//!
//! let ids = Arc::new(RequestIdAllocator::new());
//! let chain = Chain::new()
//!     .layer(MethodFilter::only(Method::POST))
//!     .layer(RequestIdAssigner::new(ids))
//!     .layer(RequestLogger);
//! ```
//!
//! a request runs the method check, then id assignment, then logging, then
//! the handler; the response unwinds in the opposite order. Swapping the last
//! two layers means the logger runs before an id exists and records the
//! sentinel `0`.
//!
//! Built-in layers:
//! - [`MethodFilter`]: `405 Method Not Allowed` for methods outside a set
//! - [`RequestIdAssigner`]: allocates an id, sets `X-Request-Id`
//! - [`RequestLogger`]: one structured log line per request
//! - [`from_fn`]: any `async fn(Request, Next) -> Response`

mod logging;
mod method_filter;
mod request_id;

pub use logging::RequestLogger;
pub use method_filter::MethodFilter;
pub use request_id::{RequestIdAssigner, X_REQUEST_ID};

use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler, DynHandler, Handler};
use crate::request::Request;
use crate::response::Response;

/// A capability that wraps a handler with extra behaviour.
///
/// `wrap` is called once per route when the chain is built, never per
/// request. The returned handler must either delegate to `inner` or produce
/// a complete response on its own.
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, inner: BoxedHandler) -> BoxedHandler;
}

// ── Chain ─────────────────────────────────────────────────────────────────────

/// An ordered, immutable-once-built list of middleware.
///
/// Cloning a chain is cheap (the layers are reference counted), so one
/// chain can be applied to several routes.
#[derive(Clone, Default)]
pub struct Chain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `middleware` inside every layer already in the chain.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    /// Appends every layer of `inner` inside this chain's layers.
    ///
    /// `a.append(b).append(c)` and `a.append(b.append(c))` build the same
    /// chain.
    pub fn append(mut self, inner: Chain) -> Self {
        self.layers.extend(inner.layers);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Wraps a terminal handler in every layer, outermost first.
    pub fn handler(&self, handler: impl Handler) -> BoxedHandler {
        self.wrap(handler.into_boxed_handler())
    }

    /// Wraps an already boxed handler in every layer, outermost first.
    pub fn wrap(&self, handler: BoxedHandler) -> BoxedHandler {
        // Fold from the innermost layer outwards so the first layer added
        // ends up on the outside.
        self.layers
            .iter()
            .rev()
            .fold(handler, |inner, middleware| middleware.wrap(inner))
    }
}

// ── from_fn ───────────────────────────────────────────────────────────────────

/// The rest of the chain, handed to a [`from_fn`] middleware.
pub struct Next {
    inner: BoxedHandler,
}

impl Next {
    /// Runs every inner layer and the terminal handler.
    pub async fn run(self, req: Request) -> Response {
        self.inner.call(req).await
    }
}

/// Builds a middleware from an async function.
///
/// ```rust
/// use gatehouse::middleware::{Chain, Next, from_fn};
/// use gatehouse::{Request, Response};
///
/// async fn stamp(req: Request, next: Next) -> Response {
///     let mut res = next.run(req).await;
///     res.headers_mut().insert("x-served-by", "gatehouse".parse().unwrap());
///     res
/// }
///
/// let chain = Chain::new().layer(from_fn(stamp));
/// ```
pub fn from_fn<F, Fut>(f: F) -> FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    FromFn { f: Arc::new(f) }
}

/// Middleware returned by [`from_fn`].
pub struct FromFn<F> {
    f: Arc<F>,
}

impl<F, Fut> Middleware for FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn wrap(&self, inner: BoxedHandler) -> BoxedHandler {
        Arc::new(FromFnHandler { f: Arc::clone(&self.f), inner })
    }
}

struct FromFnHandler<F> {
    f: Arc<F>,
    inner: BoxedHandler,
}

impl<F, Fut> DynHandler for FromFnHandler<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let next = Next { inner: Arc::clone(&self.inner) };
        Box::pin((self.f)(req, next))
    }
}
