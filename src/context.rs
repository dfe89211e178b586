//! Typed per-request metadata.

use crate::request_id::RequestId;

/// Metadata that travels with a [`Request`](crate::Request) through the
/// middleware chain.
///
/// A context is a plain value: middleware that wants to add information
/// builds a new context and swaps it in with
/// [`Request::with_context`](crate::Request::with_context). Nothing is shared
/// between requests.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RequestContext {
    request_id: Option<RequestId>,
}

impl RequestContext {
    /// An empty context: no id assigned.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(id: RequestId) -> Self {
        Self { request_id: Some(id) }
    }

    /// The id assigned to this request, or [`RequestId::UNSET`] (`0`) when no
    /// assigner has run yet. Never fails.
    pub fn request_id(&self) -> RequestId {
        self.request_id.unwrap_or(RequestId::UNSET)
    }
}
