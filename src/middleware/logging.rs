//! Request logging layer.

use std::sync::Arc;

use tracing::info;

use crate::handler::{BoxFuture, BoxedHandler, DynHandler};
use crate::middleware::Middleware;
use crate::request::Request;

/// Logs one `incoming request` line per request: method, URI, peer address
/// and the request id.
///
/// Place it inside a [`RequestIdAssigner`](super::RequestIdAssigner) to get
/// a real id; outside one it logs the sentinel `0`. The response passes
/// through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestLogger;

impl Middleware for RequestLogger {
    fn wrap(&self, inner: BoxedHandler) -> BoxedHandler {
        Arc::new(LoggingHandler { inner })
    }
}

struct LoggingHandler {
    inner: BoxedHandler,
}

impl DynHandler for LoggingHandler {
    fn call(&self, req: Request) -> BoxFuture {
        info!(
            method = %req.method(),
            uri = %req.uri(),
            remote_addr = %req.remote_addr(),
            request_id = req.request_id().get(),
            "incoming request"
        );
        self.inner.call(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    use http::StatusCode;
    use http::header::HeaderValue;

    use crate::middleware::{Chain, RequestIdAssigner};
    use crate::{Method, RequestIdAllocator, Response};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn capture() -> (Captured, tracing::subscriber::DefaultGuard) {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (captured, tracing::subscriber::set_default(subscriber))
    }

    #[tokio::test(flavor = "current_thread")]
    async fn logs_request_line_with_assigned_id() {
        let (logs, _guard) = capture();
        let handler = Chain::new()
            .layer(RequestIdAssigner::new(Arc::new(RequestIdAllocator::new())))
            .layer(RequestLogger)
            .handler(|_req: Request| async { "ok" });

        handler
            .call(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo?x=1".parse().unwrap())
                    .remote_addr("10.0.0.7:4242".parse().unwrap())
                    .build(),
            )
            .await;

        let logs = logs.contents();
        assert!(logs.contains("incoming request"), "{logs}");
        assert!(logs.contains("method=POST"), "{logs}");
        assert!(logs.contains("uri=/echo?x=1"), "{logs}");
        assert!(logs.contains("remote_addr=10.0.0.7:4242"), "{logs}");
        assert!(logs.contains("request_id=2"), "{logs}");
        assert!(logs.contains("finished handling request"), "{logs}");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn logs_sentinel_outside_the_assigner() {
        let (logs, _guard) = capture();
        let handler = Chain::new().layer(RequestLogger).handler(|_req: Request| async { "ok" });

        handler.call(Request::builder().build()).await;

        assert!(logs.contents().contains("request_id=0"));
    }

    #[tokio::test]
    async fn response_passes_through_untouched() {
        let handler = Chain::new().layer(RequestLogger).handler(|_req: Request| async {
            let mut res = Response::status(StatusCode::ACCEPTED);
            res.headers_mut().insert("x-custom", HeaderValue::from_static("1"));
            res
        });

        let res = handler.call(Request::builder().build()).await;

        assert_eq!(res.status_code(), StatusCode::ACCEPTED);
        assert_eq!(res.headers().len(), 1);
        assert_eq!(res.headers()["x-custom"], "1");
    }
}
