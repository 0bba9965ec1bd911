//! Counting signal used for the producer/consumer and resize handshakes.

use futures::executor::block_on;
use tokio::sync::Semaphore;

/// A counting semaphore with blocking acquisition.
///
/// Wraps `tokio::sync::Semaphore`, which works without a runtime, and parks
/// the calling thread in `acquire`. Acquired resources are consumed, never
/// handed back on drop.
pub struct SignalCounter {
    permits: Semaphore,
}

impl SignalCounter {
    pub fn new(available: usize) -> Self {
        Self {
            permits: Semaphore::new(available),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn release(&self, count: usize) {
        self.permits.add_permits(count);
    }

    /// Blocks until `count` resources are available and takes them.
    pub fn acquire(&self, count: usize) {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        // The semaphore is never closed, so acquisition only ever succeeds.
        if let Ok(permit) = block_on(self.permits.acquire_many(count)) {
            permit.forget();
        }
    }

    pub fn try_acquire(&self, count: usize) -> bool {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        match self.permits.try_acquire_many(count) {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }
}

impl Default for SignalCounter {
    fn default() -> Self {
        Self::new(0)
    }
}
