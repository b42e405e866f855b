//! Bounded pool for blocking connector calls.
//!
//! libssh2 is synchronous. Every blocking call goes through
//! [`WorkerPool::run_blocking`], which waits for a permit, runs the closure on
//! Tokio's blocking threads and enforces a hard wall-clock deadline, so the
//! async runtime is never stalled by a slow host.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::{ConnectorError, Result};

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `f` on a blocking thread with a deadline.
    ///
    /// On timeout the caller gets [`ConnectorError::Timeout`] immediately. The
    /// worker thread itself keeps its permit until the blocking call returns,
    /// which the connectors bound with socket-level timeouts.
    pub async fn run_blocking<T, F>(&self, deadline: Duration, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ConnectorError::Pool("worker pool closed".to_string()))?;

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        });

        match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ConnectorError::Pool(format!(
                "blocking worker failed: {join_err}"
            ))),
            Err(_elapsed) => {
                let ms = deadline.as_millis() as u64;
                warn!(timeout_ms = ms, "blocking connector call exceeded its deadline");
                Err(ConnectorError::Timeout { ms })
            }
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_closure_result() {
        let pool = WorkerPool::new(2);
        let v = pool
            .run_blocking(Duration::from_secs(1), || Ok(21 * 2))
            .await
            .unwrap();
        assert_eq!(v, 42);
    }

    #[tokio::test]
    async fn deadline_is_enforced() {
        let pool = WorkerPool::new(1);
        let err = pool
            .run_blocking(Duration::from_millis(20), || {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Timeout { ms: 20 }));
    }

    #[tokio::test]
    async fn permit_is_released_after_call() {
        let pool = WorkerPool::new(1);
        pool.run_blocking(Duration::from_secs(1), || Ok(()))
            .await
            .unwrap();
        assert_eq!(pool.available(), 1);
    }
}
