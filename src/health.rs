//! Built-in health-check handler.
//!
//! Register it on a route of its own, outside any middleware chain, so that
//! load-balancer probes neither consume request ids nor fill the log:
//!
//! ```rust
//! use gatehouse::{Router, health};
//!
//! let app = Router::new().route("/health", health::check);
//! ```

use http::StatusCode;

use crate::Request;

/// Always answers `200 OK` with an empty body. If the process can respond to
/// HTTP at all, it is healthy.
pub async fn check(_req: Request) -> StatusCode {
    StatusCode::OK
}
