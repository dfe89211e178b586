//! Exact-path request router.
//!
//! One handler per path, looked up in a [`matchit`] tree. Only static paths
//! are accepted: `/users` matches `/users` and nothing else, not `/users/`
//! and not `/users/42`. Method restrictions belong in a
//! [`MethodFilter`](crate::middleware::MethodFilter) on the route's chain.

use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::handler::{BoxedHandler, Handler};
use crate::middleware::Chain;

/// The application router.
///
/// Build it once at startup and pass it to
/// [`Server::start`](crate::Server::start). Each registration returns `self`
/// so calls chain naturally.
///
/// ```rust
/// use std::sync::Arc;
/// use gatehouse::middleware::{Chain, RequestIdAssigner, RequestLogger};
/// use gatehouse::{Request, RequestIdAllocator, Router, health};
///
/// # async fn user(_: Request) -> &'static str { "" }
/// let ids = Arc::new(RequestIdAllocator::new());
/// let traced = Chain::new()
///     .layer(RequestIdAssigner::new(ids))
///     .layer(RequestLogger);
///
/// let app = Router::new()
///     .route_layered("/user", &traced, user)
///     .route("/health", health::check);
/// ```
pub struct Router {
    routes: MatchitRouter<BoxedHandler>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: MatchitRouter::new() }
    }

    /// Registers a bare handler for `path`.
    ///
    /// # Panics
    ///
    /// Panics if `path` is already registered or contains a `{param}` or
    /// catch-all segment. Routes are fixed at startup, so a bad table is a
    /// programming error.
    pub fn route(self, path: &str, handler: impl Handler) -> Self {
        self.insert(path, handler.into_boxed_handler())
    }

    /// Registers `handler` for `path`, wrapped in every layer of `chain`.
    ///
    /// # Panics
    ///
    /// Same conditions as [`route`](Self::route).
    pub fn route_layered(self, path: &str, chain: &Chain, handler: impl Handler) -> Self {
        self.insert(path, chain.handler(handler))
    }

    fn insert(mut self, path: &str, handler: BoxedHandler) -> Self {
        if path.contains(['{', '}', '*']) {
            panic!("invalid route `{path}`: only exact paths are supported");
        }
        self.routes
            .insert(path, handler)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub(crate) fn lookup(&self, path: &str) -> Option<BoxedHandler> {
        let matched = self.routes.at(path).ok()?;
        Some(Arc::clone(matched.value))
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}
