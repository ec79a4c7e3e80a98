//! Bounded worker pool for semaphore-gated fan-out

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::task::AbortOnDropHandle;
use tracing::debug;

/// Runs futures as tasks with at most `limit` in flight at once.
///
/// The pool is parameterized at construction and owned by its caller; separate
/// pools never share permits.
#[derive(Debug, Clone)]
pub struct BoundedPool {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl BoundedPool {
    /// Create a pool; a limit of zero is raised to one
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Spawn every future; each waits for a permit before it starts running
    pub fn spawn_all<T, Fut>(&self, work: Vec<Fut>) -> PoolRun<T>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let total = work.len();
        let completed = Arc::new(AtomicUsize::new(0));

        let handles = work
            .into_iter()
            .map(|fut| {
                let semaphore = Arc::clone(&self.semaphore);
                let completed = Arc::clone(&completed);
                AbortOnDropHandle::new(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let output = fut.await;
                    completed.fetch_add(1, Ordering::Relaxed);
                    output
                }))
            })
            .collect();

        debug!(total = total, limit = self.limit, "Pool fan-out started");

        PoolRun {
            handles,
            completed,
            total,
        }
    }

    /// Spawn and await everything, returning outputs in input order
    pub async fn run_all<T, Fut>(&self, work: Vec<Fut>) -> Vec<Result<T, JoinError>>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.spawn_all(work).join().await
    }
}

/// In-flight fan-out; dropping it aborts tasks that have not finished
#[derive(Debug)]
pub struct PoolRun<T> {
    handles: Vec<AbortOnDropHandle<T>>,
    completed: Arc<AtomicUsize>,
    total: usize,
}

impl<T> PoolRun<T> {
    pub fn total(&self) -> usize {
        self.total
    }

    /// Shared counter of finished tasks, readable while `join` is pending
    pub fn progress(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.completed)
    }

    /// Await all tasks; results keep the order the work was submitted in
    pub async fn join(self) -> Vec<Result<T, JoinError>> {
        futures::future::join_all(self.handles).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_limit() {
        let pool = BoundedPool::new(3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let work: Vec<_> = (0..10)
            .map(|i| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 * (10 - i as u64))).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    i
                }
            })
            .collect();

        let results = pool.run_all(work).await;
        let outputs: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(outputs, (0..10).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.available_permits(), 3);
    }

    fn item_fault() -> i32 {
        panic!("item fault")
    }

    #[tokio::test]
    async fn test_panics_surface_as_join_errors() {
        let pool = BoundedPool::new(0);
        assert_eq!(pool.limit(), 1);

        let work = vec![
            Box::pin(async { 1 }) as std::pin::Pin<Box<dyn Future<Output = i32> + Send>>,
            Box::pin(async { item_fault() }),
        ];
        let results = pool.run_all(work).await;
        assert_eq!(*results[0].as_ref().unwrap(), 1);
        assert!(results[1].as_ref().unwrap_err().is_panic());
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_counter() {
        let pool = BoundedPool::new(2);
        let run = pool.spawn_all((0..4).map(|_| async {}).collect());
        let progress = run.progress();
        assert_eq!(run.total(), 4);
        run.join().await;
        assert_eq!(progress.load(Ordering::Relaxed), 4);
    }
}
