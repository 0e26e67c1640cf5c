use std::sync::atomic::{AtomicU32, Ordering};

/// Atomic source of outbound message numbers.
///
/// Numbers start at 1 and wrap on overflow; uniqueness only matters per
/// connection and within the lifetime of an in-flight message.
#[derive(Debug, Default)]
pub struct MessageNumbers {
    next: AtomicU32,
}

impl MessageNumbers {
    /// Creates a generator whose first number is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(0),
        }
    }

    /// Returns the next message number.
    pub fn next_msg_no(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}
