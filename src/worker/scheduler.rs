use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Caps how many chunks run at once across every job in the process.
///
/// Per-job ordering is the orchestrator's business; this only bounds the
/// total load put on the destination.
#[derive(Clone)]
pub struct ChunkScheduler {
    sem: Arc<Semaphore>,
    max: usize,
}

impl ChunkScheduler {
    /// # Panics
    ///
    /// Panics if `max_concurrent` is 0.
    pub fn new(max_concurrent: usize) -> Self {
        assert!(max_concurrent > 0, "max_concurrent must be greater than 0");

        Self {
            sem: Arc::new(Semaphore::new(max_concurrent)),
            max: max_concurrent,
        }
    }

    /// Waits for a free slot. The slot is released when the permit drops.
    ///
    /// Fails once [`close`](Self::close) has been called, including for
    /// callers already waiting.
    pub async fn acquire(&self) -> Result<ChunkPermit, AcquireError> {
        let permit = self.sem.clone().acquire_owned().await?;
        Ok(ChunkPermit { _permit: permit })
    }

    /// Refuses every later `acquire`. Permits already handed out stay valid.
    pub fn close(&self) {
        self.sem.close();
    }

    /// Number of chunks currently holding a slot.
    pub fn active(&self) -> usize {
        self.max - self.sem.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.max
    }
}

/// An occupied chunk slot.
pub struct ChunkPermit {
    _permit: OwnedSemaphorePermit,
}
