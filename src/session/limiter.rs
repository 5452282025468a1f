//! Cap on concurrently live entity instances.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::SessionError;

/// Shared by every session. A permit is held for the life of one instance.
#[derive(Debug, Clone)]
pub struct InstanceLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl InstanceLimiter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.min(Semaphore::MAX_PERMITS);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Claim a slot without waiting; a full runtime rejects the instance.
    pub fn try_acquire(&self) -> Result<OwnedSemaphorePermit, SessionError> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .map_err(|_| SessionError::AtCapacity { limit: self.limit })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
