use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{Error, Result};

/// Bounds the number of in-flight calls to a slow collaborator.
///
/// Cloning shares the same permits.
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyGate {
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

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Await `fut` while holding a permit.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self.semaphore.clone().acquire_owned().await.map_err(|_| Error::GateClosed)?;
        Ok(fut.await)
    }

    /// Run a blocking closure on the blocking pool while holding a permit.
    pub async fn run_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self.semaphore.clone().acquire_owned().await.map_err(|_| Error::GateClosed)?;
        tokio::task::spawn_blocking(f).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_gate_bounds_in_flight_calls() {
        let gate = ConcurrencyGate::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                gate.run_blocking(move || {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test]
    async fn test_run_returns_future_output() {
        let gate = ConcurrencyGate::new(0);
        assert_eq!(gate.capacity(), 1);
        let value = gate.run(async { 41 + 1 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_blocking_errors_propagate() {
        let gate = ConcurrencyGate::new(1);
        let err = gate
            .run_blocking(|| -> Result<()> { Err(Error::Enrichment("boom".to_string())) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Enrichment(_)));
    }
}
