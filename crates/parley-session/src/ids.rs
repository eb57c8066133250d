use std::sync::atomic::{AtomicU64, Ordering};

use parley_protocol::ClientId;

/// Hands out unique, monotonically increasing [`ClientId`]s.
///
/// Ids start at 1 and are never reused for the lifetime of the
/// allocator.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Returns the next unused id.
    pub fn next_id(&self) -> ClientId {
        ClientId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
