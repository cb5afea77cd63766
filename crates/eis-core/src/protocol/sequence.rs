//! Client-side object ids and server serial bookkeeping.
//!
//! # Two kinds of numbers (for beginners)
//!
//! - **Object ids** name protocol objects.  The server allocates almost all
//!   of them from the top of the 64-bit range; the client only allocates
//!   ids for its own roundtrip callbacks, from the bottom of the range.
//!   Id 0 is permanently the handshake object.
//!
//! - **Serials** are stamped by the server onto events that change state
//!   (device resumed, paused, destroyed, ...).  Emulation requests echo the
//!   most recent serial back so the server can discard requests that were
//!   sent before the client saw a state change.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::interfaces::SERVER_ID_BASE;

/// Allocates object ids for client-created objects.
///
/// Ids start at 1 and never enter the server range.
///
/// # Examples
///
/// ```rust
/// use eis_core::protocol::ClientIdAllocator;
///
/// let ids = ClientIdAllocator::new();
/// assert_eq!(ids.next(), Some(1));
/// assert_eq!(ids.next(), Some(2));
/// ```
pub struct ClientIdAllocator {
    inner: AtomicU64,
}

impl ClientIdAllocator {
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns the next free id, or `None` once the client range is used up.
    pub fn next(&self) -> Option<u64> {
        let id = self.inner.fetch_add(1, Ordering::Relaxed);
        (id < SERVER_ID_BASE).then_some(id)
    }
}

impl Default for ClientIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Remembers the most recent serial received from the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerialTracker {
    last: u32,
}

impl SerialTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a serial carried by an incoming event.
    ///
    /// Serials wrap, so the latest one observed wins rather than the largest.
    pub fn observe(&mut self, serial: u32) {
        self.last = serial;
    }

    pub fn last(&self) -> u32 {
        self.last
    }
}
