//! Request id assignment layer.

use std::sync::Arc;

use http::HeaderName;
use http::header::HeaderValue;
use tracing::{Instrument, info, info_span};

use crate::context::RequestContext;
use crate::handler::{BoxFuture, BoxedHandler, DynHandler};
use crate::middleware::Middleware;
use crate::request::Request;
use crate::request_id::RequestIdAllocator;

/// Response header carrying the request id.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Gives every request a fresh id.
///
/// The id is attached to the request's [`RequestContext`] before the inner
/// layers run, and echoed in `X-Request-Id` on the response. Everything
/// inside this layer runs in a `request` span carrying the id, and a
/// completion line is logged when the response unwinds back through it.
#[derive(Clone, Debug)]
pub struct RequestIdAssigner {
    ids: Arc<RequestIdAllocator>,
}

impl RequestIdAssigner {
    pub fn new(ids: Arc<RequestIdAllocator>) -> Self {
        Self { ids }
    }
}

impl Middleware for RequestIdAssigner {
    fn wrap(&self, inner: BoxedHandler) -> BoxedHandler {
        Arc::new(RequestIdHandler { ids: Arc::clone(&self.ids), inner })
    }
}

struct RequestIdHandler {
    ids: Arc<RequestIdAllocator>,
    inner: BoxedHandler,
}

impl DynHandler for RequestIdHandler {
    fn call(&self, req: Request) -> BoxFuture {
        let id = self.ids.next();
        let req = req.with_context(RequestContext::with_request_id(id));
        let span = info_span!("request", request_id = id.get());
        let inner = self.inner.call(req).instrument(span);

        Box::pin(async move {
            let mut response = inner.await;
            response.headers_mut().insert(X_REQUEST_ID, HeaderValue::from(id.get()));
            info!(
                request_id = id.get(),
                status = response.status_code().as_u16(),
                "finished handling request"
            );
            response
        })
    }
}
