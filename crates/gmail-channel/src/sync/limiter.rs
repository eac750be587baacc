//! Bounded-parallelism gate for dispatch to the agent

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Dispatch slots shared by every account's monitor
///
/// Cloning shares the same slots.
#[derive(Debug, Clone)]
pub struct DispatchLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl DispatchLimiter {
    pub const DEFAULT_CAPACITY: usize = 5;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots free right now
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a slot; it is released when the permit drops
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        Arc::clone(&self.semaphore).acquire_owned().await
    }

    /// Run `fut` while holding a slot
    ///
    /// The slot is released when `fut` finishes, fails or is dropped.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, AcquireError> {
        let _permit = self.acquire().await?;
        Ok(fut.await)
    }
}

impl Default for DispatchLimiter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
