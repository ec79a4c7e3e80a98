//! # Execution Substrate
//!
//! The contract the orchestration logic needs from a durable-execution engine:
//! schedule-and-await a unit with timeout and retry, schedule a child unit with
//! its own identity, start detached background work, read the substrate clock.
//!
//! [`LocalSubstrate`] implements the contract in-process on tokio. Each attempt
//! runs as its own task and is supervised for its schedule-to-close timeout,
//! its heartbeat timeout and cancellation. Durability and replay are the
//! business of a real engine plugged in behind the same trait.

use super::{DetachedTasks, RetryPolicy, UnitContext, UnitOptions};
use crate::error::{BatchflowError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

#[async_trait]
pub trait Substrate: Send + Sync + 'static {
    /// Schedule a unit and await its result, retrying per `options.retry_policy`
    async fn execute_unit<T, F, Fut>(&self, options: UnitOptions, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(Arc<UnitContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static;

    /// Schedule a child unit identified by `child_id`
    async fn execute_child<T, F, Fut>(
        &self,
        child_id: &str,
        options: UnitOptions,
        work: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(Arc<UnitContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static;

    /// Start background work without awaiting it; failures go to a side channel
    fn spawn_detached<F>(&self, name: &str, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static;

    fn now(&self) -> Instant;

    /// Token observed by every unit scheduled on this substrate
    fn cancellation(&self) -> CancellationToken;

    /// Same substrate, with units observing `cancel` instead.
    /// Detached work stays shared with `self`.
    fn scoped(&self, cancel: CancellationToken) -> Self
    where
        Self: Sized;

    /// Schedule a unit now and collect its result later. Dropping the handle aborts the unit.
    fn start_unit<T, F, Fut>(&self, options: UnitOptions, work: F) -> UnitHandle<T>
    where
        Self: Clone + Sized,
        T: Send + 'static,
        F: Fn(Arc<UnitContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let substrate = self.clone();
        let name = options.name.clone();
        let handle = tokio::spawn(async move { substrate.execute_unit(options, work).await });
        UnitHandle {
            name,
            handle: AbortOnDropHandle::new(handle),
        }
    }
}

/// Handle to a unit started with [`Substrate::start_unit`]; aborts the unit when dropped
#[derive(Debug)]
pub struct UnitHandle<T> {
    name: String,
    handle: AbortOnDropHandle<Result<T>>,
}

impl<T> UnitHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> Result<T> {
        match self.handle.await {
            Ok(result) => result,
            Err(join_error) => Err(BatchflowError::ActivityExecutionError {
                message: format!("Unit task failed: {join_error}"),
                activity_type: Some(self.name),
                attempt: None,
            }),
        }
    }
}

/// In-process tokio substrate
#[derive(Debug, Clone, Default)]
pub struct LocalSubstrate {
    cancel: CancellationToken,
    detached: DetachedTasks,
}

impl LocalSubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            detached: DetachedTasks::new(),
        }
    }

    pub fn detached_tasks(&self) -> &DetachedTasks {
        &self.detached
    }

    /// Cancel every unit scheduled on this substrate
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn run_attempt<T, F, Fut>(&self, options: &UnitOptions, attempt: u32, work: &F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(Arc<UnitContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let attempt_cancel = self.cancel.child_token();
        let ctx = Arc::new(UnitContext::new(
            options.name.clone(),
            attempt,
            options.heartbeat_timeout,
            attempt_cancel.clone(),
        ));
        let mut heartbeats = ctx.subscribe();
        let mut heartbeat_timeout = options.heartbeat_timeout;

        let mut handle = AbortOnDropHandle::new(tokio::spawn(work(Arc::clone(&ctx))));
        let deadline = tokio::time::sleep(options.schedule_to_close_timeout);
        tokio::pin!(deadline);

        loop {
            let heartbeat_wait = async {
                match heartbeat_timeout {
                    Some(window) => Some(tokio::time::timeout(window, heartbeats.changed()).await),
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                joined = &mut handle => {
                    return match joined {
                        Ok(result) => result,
                        Err(join_error) => Err(BatchflowError::ActivityExecutionError {
                            message: format!("Unit attempt panicked or was aborted: {join_error}"),
                            activity_type: Some(options.name.clone()),
                            attempt: Some(attempt),
                        }),
                    };
                }
                _ = &mut deadline => {
                    attempt_cancel.cancel();
                    handle.abort();
                    return Err(BatchflowError::timeout(
                        format!("schedule-to-close timeout of {:?} exceeded", options.schedule_to_close_timeout),
                        options.name.clone(),
                        options.schedule_to_close_timeout,
                    ));
                }
                waited = heartbeat_wait => match waited {
                    Some(Ok(Ok(()))) => continue,
                    // Sender gone; nothing left to supervise
                    Some(Ok(Err(_))) | None => heartbeat_timeout = None,
                    Some(Err(_)) => {
                        attempt_cancel.cancel();
                        handle.abort();
                        let window = options.heartbeat_timeout.unwrap_or_default();
                        return Err(BatchflowError::timeout(
                            format!("no heartbeat within {window:?}"),
                            options.name.clone(),
                            window,
                        ));
                    }
                },
                _ = self.cancel.cancelled() => {
                    attempt_cancel.cancel();
                    handle.abort();
                    return Err(BatchflowError::cancelled(options.name.clone()));
                }
            }
        }
    }
}

#[async_trait]
impl Substrate for LocalSubstrate {
    async fn execute_unit<T, F, Fut>(&self, options: UnitOptions, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(Arc<UnitContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let policy: &RetryPolicy = &options.retry_policy;
        let mut attempt = 1;

        loop {
            if self.cancel.is_cancelled() {
                return Err(BatchflowError::cancelled(options.name.clone()));
            }

            debug!(unit = %options.name, attempt = attempt, "Starting unit attempt");

            let error = match self.run_attempt(&options, attempt, &work).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if error.is_cancellation() {
                return Err(error);
            }

            if !error.is_retryable() {
                warn!(
                    unit = %options.name,
                    attempt = attempt,
                    error = %error,
                    "Unit failed with non-retryable error"
                );
                return Err(error);
            }

            if !policy.has_attempts_remaining(attempt) {
                warn!(
                    unit = %options.name,
                    attempts = attempt,
                    error = %error,
                    "Unit exhausted its retry policy"
                );
                return Err(BatchflowError::RetriesExhausted {
                    unit: options.name.clone(),
                    attempts: attempt,
                    last_error: Box::new(error),
                });
            }

            let delay: Duration = policy.delay_for_attempt(attempt);
            warn!(
                unit = %options.name,
                attempt = attempt,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Unit attempt failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    return Err(BatchflowError::cancelled(options.name.clone()));
                }
            }
            attempt += 1;
        }
    }

    async fn execute_child<T, F, Fut>(
        &self,
        child_id: &str,
        options: UnitOptions,
        work: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(Arc<UnitContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        info!(child_id = %child_id, "Starting child unit");
        let result = self.execute_unit(options.named(child_id), work).await;
        match &result {
            Ok(_) => info!(child_id = %child_id, "Child unit completed"),
            Err(error) => warn!(child_id = %child_id, error = %error, "Child unit failed"),
        }
        result
    }

    fn spawn_detached<F>(&self, name: &str, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.detached.spawn(name, work);
    }

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn scoped(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            detached: self.detached.clone(),
        }
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionContext;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn options(name: &str) -> UnitOptions {
        UnitOptions::new(name, Duration::from_secs(30)).with_retry_policy(RetryPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(10),
            2.0,
            3,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let substrate = LocalSubstrate::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let value = substrate
            .execute_unit(options("flaky"), move |ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if ctx.attempt() < 3 {
                        Err(BatchflowError::processing("transient"))
                    } else {
                        Ok(ctx.attempt())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let substrate = LocalSubstrate::new();
        let started = Instant::now();

        let error = substrate
            .execute_unit(options("doomed"), |_ctx| async {
                Err::<(), _>(BatchflowError::processing("still broken"))
            })
            .await
            .unwrap_err();

        match error {
            BatchflowError::RetriesExhausted { attempts, last_error, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last_error, BatchflowError::DataProcessingError { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // 1s + 2s of backoff between three attempts
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let substrate = LocalSubstrate::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let error = substrate
            .execute_unit(options("invalid"), move |_ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(BatchflowError::validation("bad input", "content")) }
            })
            .await
            .unwrap_err();

        assert!(matches!(error, BatchflowError::ValidationError { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_heartbeat_times_out_attempt() {
        let substrate = LocalSubstrate::new();
        let opts = UnitOptions::new("stalled", Duration::from_secs(600))
            .with_heartbeat_timeout(Duration::from_secs(5))
            .with_retry_policy(RetryPolicy::no_retry());

        let error = substrate
            .execute_unit(opts, |_ctx| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        let BatchflowError::RetriesExhausted { last_error, .. } = error else {
            panic!("expected exhaustion");
        };
        assert!(last_error.to_string().contains("no heartbeat"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_keep_long_attempt_alive() {
        let substrate = LocalSubstrate::new();
        let opts = UnitOptions::new("busy", Duration::from_secs(600))
            .with_heartbeat_timeout(Duration::from_secs(5))
            .with_retry_policy(RetryPolicy::no_retry());

        let result = substrate
            .execute_unit(opts, |ctx| async move {
                for i in 0..10 {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    ctx.heartbeat(&format!("step {i}"));
                }
                Ok(ctx.heartbeat_count())
            })
            .await;

        assert_eq!(result.unwrap(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_to_close_timeout() {
        let substrate = LocalSubstrate::new();
        let opts = UnitOptions::new("slow", Duration::from_secs(2))
            .with_retry_policy(RetryPolicy::no_retry());

        let error = substrate
            .execute_unit(opts, |_ctx| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(error.to_string().contains("schedule-to-close"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_reaches_running_unit() {
        let substrate = LocalSubstrate::new();
        let handle = substrate.start_unit(options("cancellable"), |ctx| async move {
            ctx.cancellation().cancelled().await;
            Err::<(), _>(BatchflowError::cancelled("cancellable"))
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        substrate.cancel();

        let error = handle.join().await.unwrap_err();
        assert!(error.is_cancellation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scoped_cancellation_stays_in_scope() {
        let substrate = LocalSubstrate::new();
        let run = substrate.scoped(substrate.cancellation().child_token());
        run.cancellation().cancel();

        let error = run
            .execute_unit(options("scoped"), |_ctx| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(error.is_cancellation());
        assert!(substrate
            .execute_unit(options("unscoped"), |_ctx| async { Ok(()) })
            .await
            .is_ok());

        run.spawn_detached("shared", async { Err(BatchflowError::processing("shared log")) });
        substrate.detached_tasks().drain().await;
        assert_eq!(substrate.detached_tasks().failures().len(), 1);

        let next = substrate.scoped(substrate.cancellation().child_token());
        substrate.cancel();
        assert!(next.cancellation().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_unit_handle_aborts_the_unit() {
        let substrate = LocalSubstrate::new();
        let (alive, mut gone) = tokio::sync::mpsc::channel::<()>(1);
        let handle = substrate.start_unit(options("sampler"), move |_ctx| {
            let alive = alive.clone();
            async move {
                let _alive = alive;
                std::future::pending::<Result<()>>().await
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        drop(handle);

        let closed = tokio::time::timeout(Duration::from_secs(5), gone.recv()).await;
        assert_eq!(closed, Ok(None));
    }
}
