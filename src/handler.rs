//! Handler trait and type erasure.
//!
//! # How handlers and middleware share one shape
//!
//! Routes, middleware layers and the terminal `async fn` all end up as the
//! same thing at runtime: a [`BoxedHandler`], i.e. an
//! `Arc<dyn DynHandler>`. A middleware takes one `BoxedHandler` and returns
//! another that wraps it, so a whole chain collapses into a single value that
//! the router stores per path.
//!
//! ```text
//! async fn echo(req: Request) -> Response { … }   ← user writes this
//!        ↓ chain.handler(echo)
//! echo.into_boxed_handler()                      ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(echo))                      ← terminal BoxedHandler
//!        ↓ folded through every Middleware::wrap
//! Arc<MethodFilterHandler { inner: Arc<…> }>     ← outermost BoxedHandler
//!        ↓ handler.call(req) at request time
//! one virtual call per layer
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// A heap-allocated, type-erased future that resolves to a [`Response`].
///
/// `Send + 'static` let tokio move the future across worker threads.
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Object-safe dispatch interface shared by terminal handlers and
/// middleware layers.
///
/// Implement this when writing a [`Middleware`](crate::middleware::Middleware)
/// by hand; for plain endpoints write an `async fn` and let [`Handler`] box
/// it.
pub trait DynHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn DynHandler + Send + Sync + 'static>;

/// Implemented for every valid terminal handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// function with the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// including closures that capture shared state behind an `Arc`.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Bridges a concrete `async fn` into the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> DynHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    async fn teapot(_req: Request) -> StatusCode {
        StatusCode::IM_A_TEAPOT
    }

    #[tokio::test]
    async fn async_fn_is_boxed_and_converted() {
        let handler = teapot.into_boxed_handler();
        let res = handler.call(Request::builder().build()).await;
        assert_eq!(res.status_code(), StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn capturing_closure_is_a_handler() {
        let greeting = Arc::new(String::from("hi"));
        let handler = (move |_req: Request| {
            let greeting = Arc::clone(&greeting);
            async move { greeting.to_string() }
        })
        .into_boxed_handler();

        let res = handler.call(Request::builder().build()).await;
        assert_eq!(res.body().as_ref(), b"hi");
    }
}
