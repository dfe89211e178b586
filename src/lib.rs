//! # gatehouse
//!
//! A minimal HTTP request pipeline. Requests go through a chain of
//! middleware to a handler; a termination signal drains the server within a
//! deadline.
//!
//! ## The contract
//!
//! - **Exact-path routing.** One handler per path. No parameters, no
//!   wildcards.
//! - **Explicit middleware chains.** A [`Chain`](middleware::Chain) is an
//!   ordered list of layers folded once at startup. The first layer added is
//!   the outermost; what each layer can see follows from that order.
//! - **Request ids from an owned allocator.** A lock-free counter you create
//!   and share, not a global.
//! - **Bounded shutdown.** SIGTERM or Ctrl-C stops accepting, gives
//!   in-flight requests a deadline to finish, then closes whatever is left.
//!   The [`ShutdownReport`] tells `main` which exit status to use.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::process::ExitCode;
//! use std::sync::Arc;
//!
//! use gatehouse::middleware::{Chain, MethodFilter, RequestIdAssigner, RequestLogger};
//! use gatehouse::{Method, Request, RequestIdAllocator, Response, Router, Server, health};
//!
//! #[tokio::main]
//! async fn main() -> ExitCode {
//!     let ids = Arc::new(RequestIdAllocator::new());
//!     let traced = Chain::new()
//!         .layer(RequestIdAssigner::new(ids))
//!         .layer(RequestLogger);
//!     let post_only = Chain::new()
//!         .layer(MethodFilter::only(Method::POST))
//!         .append(traced.clone());
//!
//!     let app = Router::new()
//!         .route_layered("/echo", &post_only, echo)
//!         .route_layered("/hello", &traced, hello)
//!         .route("/health", health::check);
//!
//!     match Server::bind("0.0.0.0:8000".parse().unwrap()).serve(app).await {
//!         Ok(report) => report.exit_code(),
//!         Err(_) => ExitCode::FAILURE,
//!     }
//! }
//!
//! async fn echo(req: Request) -> Response {
//!     Response::json(req.body().clone())
//! }
//!
//! async fn hello(req: Request) -> String {
//!     format!("hello, request {}", req.request_id())
//! }
//! ```

mod config;
mod context;
mod error;
mod handler;
mod io;
mod request;
mod request_id;
mod response;
mod router;
mod server;
mod shutdown;
mod tls;

pub mod health;
pub mod middleware;
pub mod signal;

pub use config::{
    DEFAULT_DRAIN_DEADLINE, DEFAULT_HEADER_READ_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT,
    ServerConfig, TlsConfig,
};
pub use context::RequestContext;
pub use error::Error;
pub use handler::{BoxFuture, BoxedHandler, DynHandler, Handler};
pub use http::{Method, StatusCode};
pub use request::{Request, RequestBuilder};
pub use request_id::{RequestId, RequestIdAllocator};
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::{DrainOutcome, RunningServer, Server, ServerState};
pub use shutdown::{ShutdownCoordinator, ShutdownOutcome, ShutdownReport, ShutdownState, Trigger};
pub use signal::Signal;
