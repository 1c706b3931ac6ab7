//! Bounded worker pools.
//!
//! Fetches and aggregation run on separate pools so slow node calls can't
//! starve the reducers (and the other way round).

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinError;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Run an I/O-bound future once a slot is free.
    pub async fn run<F: Future>(&self, fut: F) -> F::Output {
        // The semaphore is never closed, so acquire can't fail
        let _permit = self.permits.acquire().await.ok();
        fut.await
    }

    /// Run a CPU-bound closure on the blocking thread pool once a slot is free.
    pub async fn run_blocking<F, R>(&self, f: F) -> Result<R, JoinError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permit = self.permits.clone().acquire_owned().await.ok();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
    }
}
