//! Request identifiers and the lock-free allocator that hands them out.
//!
//! Every request that passes through a
//! [`RequestIdAssigner`](crate::middleware::RequestIdAssigner) gets a fresh
//! [`RequestId`]. The id is used to correlate log lines across the layers of
//! a single request and is echoed to the client in `X-Request-Id`.
//!
//! The allocator is an explicitly owned value. Share it with
//! `Arc<RequestIdAllocator>` between every assigner that should draw from the
//! same sequence:
//!
//! ```rust
//! use std::sync::Arc;
//! use gatehouse::RequestIdAllocator;
//!
//! let ids = Arc::new(RequestIdAllocator::new());
//! let first = ids.next();
//! let second = ids.next();
//! assert!(second > first);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A per-request correlation id.
///
/// `0` is reserved: it is what [`RequestContext::request_id`] reports when no
/// id has been assigned. The allocator never produces it.
///
/// [`RequestContext::request_id`]: crate::RequestContext::request_id
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RequestId(u64);

impl RequestId {
    /// The "not assigned" sentinel.
    pub const UNSET: Self = Self(0);

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_set(self) -> bool {
        self.0 != 0
    }
}

impl From<RequestId> for u64 {
    fn from(id: RequestId) -> u64 {
        id.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide, monotonically increasing id source.
///
/// The counter starts at 1 so that 0 stays free for [`RequestId::UNSET`].
/// Each call to [`next`](Self::next) increments it and returns the new value,
/// so after `N` allocations the largest id handed out is `1 + N`.
///
/// Allocation is a single `fetch_add` on an [`AtomicU64`]; it sits on the hot
/// path of every request and never takes a lock.
#[derive(Debug)]
pub struct RequestIdAllocator {
    counter: AtomicU64,
}

impl RequestIdAllocator {
    const INITIAL: u64 = 1;

    pub fn new() -> Self {
        Self { counter: AtomicU64::new(Self::INITIAL) }
    }

    /// Allocates the next id. Never fails and never repeats a value.
    pub fn next(&self) -> RequestId {
        // Uniqueness only needs the atomicity of the increment; no other
        // memory is published through the counter.
        RequestId(self.counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// The most recently allocated id, or the initial counter value if
    /// nothing has been allocated yet.
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for RequestIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
