//! # Batch Executor
//!
//! Applies the [`ItemProcessor`] to every item of a batch and aggregates a
//! [`BatchProcessingResult`]. One item's fault never aborts its batch: errors
//! and panicked item tasks are reconciled into `failed` item results. Only
//! cancellation escapes.
//!
//! The executor does not retry. Retries belong to the unit that wraps it; see
//! [`BatchExecutor::unit_options`].

use super::ItemProcessor;
use crate::config::WorkflowSettings;
use crate::constants::{system, ProcessingMode};
use crate::error::{BatchflowError, Result};
use crate::execution::{BoundedPool, ExecutionContext, UnitOptions};
use crate::logging::log_batch_operation;
use crate::models::{BatchProcessingResult, DataBatch, ProcessingResult};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct BatchExecutor {
    processor: Arc<ItemProcessor>,
    max_concurrent_activities: usize,
    heartbeat_interval: Duration,
}

impl BatchExecutor {
    pub fn new(processor: Arc<ItemProcessor>, max_concurrent_activities: usize) -> Self {
        Self {
            processor,
            max_concurrent_activities: max_concurrent_activities.max(1),
            heartbeat_interval: system::PARALLEL_HEARTBEAT_INTERVAL,
        }
    }

    pub fn processor(&self) -> &Arc<ItemProcessor> {
        &self.processor
    }

    /// Scheduling options for a batch unit, scaled by batch size
    pub fn unit_options(batch: &DataBatch, settings: &WorkflowSettings) -> UnitOptions {
        let size = batch.batch_size() as u64;
        let (name, timeout, heartbeat) = match batch.processing_mode() {
            ProcessingMode::Sequential => (
                "process_batch_sequential",
                Duration::from_secs(size * 10 + 300),
                settings.item_heartbeat_timeout(),
            ),
            ProcessingMode::Parallel | ProcessingMode::Batch => (
                "process_batch_parallel",
                Duration::from_secs((size * 2).max(300)),
                Duration::from_secs(20),
            ),
        };

        UnitOptions::new(name, timeout)
            .with_heartbeat_timeout(heartbeat)
            .with_retry_policy(settings.activity_retry_policy())
    }

    pub async fn execute(
        &self,
        batch: &DataBatch,
        ctx: Arc<dyn ExecutionContext>,
    ) -> Result<BatchProcessingResult> {
        let started = ctx.now();
        let batch_id = batch.id().to_string();

        info!(
            batch_id = %batch_id,
            batch_size = batch.batch_size(),
            mode = %batch.processing_mode(),
            "Starting batch processing"
        );

        let item_results = match batch.processing_mode() {
            ProcessingMode::Sequential => self.execute_sequential(batch, ctx.as_ref()).await?,
            ProcessingMode::Parallel | ProcessingMode::Batch => {
                self.execute_parallel(batch, Arc::clone(&ctx)).await?
            }
        };

        let elapsed = started.elapsed();
        let result =
            BatchProcessingResult::from_item_results(batch.id(), item_results, elapsed.as_secs_f64());

        log_batch_operation(
            "execute_batch",
            &batch_id,
            result.total_items(),
            if result.is_fully_successful() { "completed" } else { "partial" },
            Some(elapsed.as_millis() as u64),
            Some(
                format!(
                    "{}/{} items successful",
                    result.successful_items(),
                    result.total_items()
                )
                .as_str(),
            ),
        );

        Ok(result)
    }

    async fn execute_sequential(
        &self,
        batch: &DataBatch,
        ctx: &dyn ExecutionContext,
    ) -> Result<Vec<ProcessingResult>> {
        let total = batch.batch_size();
        let mut results = Vec::with_capacity(total);

        for (index, item) in batch.items().iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(BatchflowError::cancelled(format!("batch {}", batch.id())));
            }
            ctx.heartbeat(&format!("Processing item {}/{}", index + 1, total));

            let result = match self.processor.process(item, ctx).await {
                Ok(result) => result,
                Err(error) if error.is_cancellation() => return Err(error),
                Err(error) => {
                    error!(
                        batch_id = %batch.id(),
                        item_id = %item.id(),
                        error = %error,
                        "Item processing failed in batch"
                    );
                    ProcessingResult::failed(item.id(), error.to_string(), 0.0)
                }
            };
            results.push(result);
        }

        Ok(results)
    }

    async fn execute_parallel(
        &self,
        batch: &DataBatch,
        ctx: Arc<dyn ExecutionContext>,
    ) -> Result<Vec<ProcessingResult>> {
        let total = batch.batch_size();
        let pool = BoundedPool::new(self.max_concurrent_activities.min(total));
        let cancellation = ctx.cancellation();

        let work = batch
            .items()
            .iter()
            .cloned()
            .map(|item| {
                let processor = Arc::clone(&self.processor);
                let ctx = Arc::clone(&ctx);
                async move { processor.process(&item, ctx.as_ref()).await }
            })
            .collect();

        let run = pool.spawn_all(work);
        let progress = run.progress();
        let joined = run.join();
        tokio::pin!(joined);

        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcomes = loop {
            tokio::select! {
                outcomes = &mut joined => break outcomes,
                _ = ticker.tick() => {
                    let completed = progress.load(Ordering::Relaxed);
                    ctx.heartbeat(&format!("Processing {completed}/{total} items"));
                }
                _ = cancellation.cancelled() => {
                    return Err(BatchflowError::cancelled(format!("batch {}", batch.id())));
                }
            }
        };

        let mut results = Vec::with_capacity(total);
        for (item, outcome) in batch.items().iter().zip(outcomes) {
            let result = match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(error)) if error.is_cancellation() => return Err(error),
                Ok(Err(error)) => {
                    error!(
                        batch_id = %batch.id(),
                        item_id = %item.id(),
                        error = %error,
                        "Parallel item processing failed"
                    );
                    ProcessingResult::failed(item.id(), error.to_string(), 0.0)
                }
                Err(join_error) => {
                    error!(
                        batch_id = %batch.id(),
                        item_id = %item.id(),
                        error = %join_error,
                        "Parallel item task failed"
                    );
                    ProcessingResult::failed(item.id(), format!("Item task failed: {join_error}"), 0.0)
                }
            };
            results.push(result);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::Priority;
    use crate::execution::UnitContext;
    use crate::models::DataItem;

    fn batch(mode: ProcessingMode, n: usize) -> DataBatch {
        let items = (0..n)
            .map(|i| DataItem::new(format!("item-{i}"), "text/plain", 1000 * (i as u64 + 1)).unwrap())
            .collect();
        DataBatch::from_items(items, mode, Priority::Medium).unwrap()
    }

    #[test]
    fn test_unit_options_scale_with_batch_size() {
        let settings = WorkflowSettings::default();

        let sequential = BatchExecutor::unit_options(&batch(ProcessingMode::Sequential, 50), &settings);
        assert_eq!(sequential.schedule_to_close_timeout, Duration::from_secs(800));
        assert_eq!(sequential.heartbeat_timeout, Some(Duration::from_secs(30)));

        let small = BatchExecutor::unit_options(&batch(ProcessingMode::Parallel, 10), &settings);
        assert_eq!(small.schedule_to_close_timeout, Duration::from_secs(300));
        assert_eq!(small.heartbeat_timeout, Some(Duration::from_secs(20)));
        assert_eq!(small.retry_policy.max_attempts, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_preserves_order_and_heartbeats() {
        let executor = BatchExecutor::new(Arc::new(ItemProcessor::default()), 10);
        let batch = batch(ProcessingMode::Sequential, 4);
        let ctx = Arc::new(UnitContext::standalone("batch", Some(Duration::from_secs(30))));

        let result = executor.execute(&batch, ctx.clone()).await.unwrap();

        assert_eq!(result.successful_items(), 4);
        let order: Vec<_> = result.item_results().iter().map(|r| r.item_id).collect();
        let expected: Vec<_> = batch.items().iter().map(DataItem::id).collect();
        assert_eq!(order, expected);
        assert!(ctx.heartbeat_count() >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_aligns_results_with_input() {
        let executor = BatchExecutor::new(Arc::new(ItemProcessor::default()), 2);
        // later items are smaller so they finish first
        let items = (0..5)
            .map(|i| DataItem::new(format!("item-{i}"), "text/plain", 10_000 * (5 - i as u64)).unwrap())
            .collect();
        let batch = DataBatch::from_items(items, ProcessingMode::Parallel, Priority::High).unwrap();
        let ctx = Arc::new(UnitContext::standalone("batch", Some(Duration::from_secs(20))));

        let result = executor.execute(&batch, ctx.clone()).await.unwrap();

        assert_eq!(result.total_items(), 5);
        assert_eq!(result.successful_items(), 5);
        for (item, item_result) in batch.items().iter().zip(result.item_results()) {
            assert_eq!(item.id(), item_result.item_id);
            assert_eq!(
                item_result.processed_content.as_deref(),
                Some(item.content().to_uppercase().as_str())
            );
        }
        assert!(ctx
            .last_heartbeat_details()
            .is_some_and(|details| details.starts_with("Processing")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_escapes_batch() {
        let executor = BatchExecutor::new(Arc::new(ItemProcessor::default()), 4);
        let batch = batch(ProcessingMode::Parallel, 3);
        let ctx = Arc::new(UnitContext::standalone("batch", None));
        ctx.cancellation().cancel();

        let error = executor.execute(&batch, ctx).await.unwrap_err();
        assert!(error.is_cancellation());
    }
}
