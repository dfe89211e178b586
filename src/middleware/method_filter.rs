//! Method restriction layer.

use std::sync::Arc;

use http::header::{ALLOW, HeaderValue};
use http::{Method, StatusCode};
use tracing::debug;

use crate::handler::{BoxFuture, BoxedHandler, DynHandler};
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::Response;

/// Rejects requests whose method is not in an allowed set.
///
/// A rejected request gets `405 Method Not Allowed` with an `Allow` header
/// listing the permitted methods; nothing inside this layer runs.
#[derive(Clone, Debug)]
pub struct MethodFilter {
    allowed: Arc<[Method]>,
    allow_header: HeaderValue,
}

impl MethodFilter {
    pub fn new(allowed: impl IntoIterator<Item = Method>) -> Self {
        let mut methods: Vec<Method> = Vec::new();
        for method in allowed {
            if !methods.contains(&method) {
                methods.push(method);
            }
        }

        let joined = methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
        // Method names are tokens, so the joined list is always a valid
        // header value.
        let allow_header = HeaderValue::from_str(&joined).unwrap_or(HeaderValue::from_static(""));

        Self { allowed: methods.into(), allow_header }
    }

    /// Allows exactly one method.
    pub fn only(method: Method) -> Self {
        Self::new([method])
    }

    pub fn allows(&self, method: &Method) -> bool {
        self.allowed.contains(method)
    }
}

impl Middleware for MethodFilter {
    fn wrap(&self, inner: BoxedHandler) -> BoxedHandler {
        Arc::new(MethodFilterHandler { filter: self.clone(), inner })
    }
}

struct MethodFilterHandler {
    filter: MethodFilter,
    inner: BoxedHandler,
}

impl DynHandler for MethodFilterHandler {
    fn call(&self, req: Request) -> BoxFuture {
        if self.filter.allows(req.method()) {
            return self.inner.call(req);
        }

        debug!(method = %req.method(), path = req.path(), "method not allowed");
        let response = Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(ALLOW, self.filter.allow_header.clone())
            .text("Method Not Allowed");
        Box::pin(async move { response })
    }
}
