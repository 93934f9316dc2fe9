use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::EngineError;

/// Bounded pool for CPU-bound work.
///
/// Jobs run on tokio's blocking threads; the semaphore caps how many run at
/// once so pairwise scoring cannot starve I/O.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn idle(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` once a slot is free.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Compute`] if the job panics or the pool is closed.
    pub async fn run<F, T>(&self, job: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| EngineError::Compute(format!("worker pool closed: {e}")))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| EngineError::Compute(format!("worker task failed: {e}")))
    }
}
