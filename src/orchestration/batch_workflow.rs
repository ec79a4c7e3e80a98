//! # Batch Child Unit
//!
//! Each batch runs as a child unit with its own identity
//! (`{workflow_id}-batch-{n}`) wrapping the batch activity unit. The activity
//! retries per the configured activity policy. When it exhausts that policy
//! the child attempt fails retryably, so the child retry policy (sized by
//! `max_retries`) gets its turn before the batch is reported as degraded.

use crate::config::WorkflowSettings;
use crate::error::{BatchflowError, Result};
use crate::execution::{ExecutionContext, RetryPolicy, Substrate, UnitOptions};
use crate::models::{BatchProcessingResult, DataBatch, DataItem, WorkflowInput};
use crate::processing::BatchExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::error;
use uuid::Uuid;

const CHILD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Batch scheduling for one workflow run
#[derive(Debug, Clone)]
pub struct BatchWorkflow<S> {
    substrate: S,
    executor: Arc<BatchExecutor>,
    settings: WorkflowSettings,
    child_options: UnitOptions,
    enable_retry: bool,
}

impl<S: Substrate + Clone> BatchWorkflow<S> {
    pub fn new(
        substrate: S,
        executor: Arc<BatchExecutor>,
        settings: WorkflowSettings,
        input: &WorkflowInput,
    ) -> Self {
        Self {
            substrate,
            executor,
            settings,
            child_options: Self::child_options(input),
            enable_retry: input.enable_retry,
        }
    }

    pub fn child_id(workflow_id: &str, index: usize) -> String {
        format!("{workflow_id}-batch-{}", index + 1)
    }

    pub fn child_options(input: &WorkflowInput) -> UnitOptions {
        let policy = if input.enable_retry {
            RetryPolicy::new(
                Duration::from_secs(5),
                Duration::from_secs(120),
                2.0,
                input.processing_config.max_retries,
            )
        } else {
            RetryPolicy::no_retry()
        };
        UnitOptions::new("batch_child_workflow", CHILD_TIMEOUT).with_retry_policy(policy)
    }

    fn activity_options(&self, batch: &DataBatch) -> UnitOptions {
        let options = BatchExecutor::unit_options(batch, &self.settings);
        if self.enable_retry {
            options
        } else {
            options.with_retry_policy(RetryPolicy::no_retry())
        }
    }

    /// Run one batch as a child unit and await its result
    pub async fn run(
        &self,
        workflow_id: &str,
        index: usize,
        batch: Arc<DataBatch>,
    ) -> Result<BatchProcessingResult> {
        let child_id = Self::child_id(workflow_id, index);
        let activity = self.activity_options(&batch);
        let substrate = self.substrate.clone();
        let executor = Arc::clone(&self.executor);

        self.substrate
            .execute_child(&child_id, self.child_options.clone(), move |child_ctx| {
                let substrate = substrate.clone();
                let executor = Arc::clone(&executor);
                let batch = Arc::clone(&batch);
                let activity = activity.clone();
                async move {
                    let outcome = substrate
                        .execute_unit(activity, move |ctx| {
                            let executor = Arc::clone(&executor);
                            let batch = Arc::clone(&batch);
                            async move { executor.execute(&batch, ctx).await }
                        })
                        .await;

                    match outcome {
                        Err(BatchflowError::RetriesExhausted {
                            unit,
                            attempts,
                            last_error,
                        }) => Err(BatchflowError::ActivityExecutionError {
                            message: format!(
                                "{unit} failed after {attempts} attempts: {last_error}"
                            ),
                            activity_type: Some("process_batch".to_string()),
                            attempt: Some(child_ctx.attempt()),
                        }),
                        other => other,
                    }
                }
            })
            .await
    }

    /// As [`run`](Self::run), but a batch that fails for good comes back as a
    /// degraded result with every item failed. Only cancellation is an error.
    pub async fn run_or_degrade(
        &self,
        workflow_id: &str,
        index: usize,
        batch: Arc<DataBatch>,
    ) -> Result<BatchProcessingResult> {
        let started = Instant::now();
        match self.run(workflow_id, index, Arc::clone(&batch)).await {
            Ok(result) => Ok(result),
            Err(error) if error.is_cancellation() => Err(error),
            Err(error) => {
                error!(
                    workflow_id = %workflow_id,
                    batch_index = index + 1,
                    batch_id = %batch.id(),
                    error = %error,
                    "Batch failed, recording degraded result"
                );
                Ok(degraded(&batch, &error.to_string(), started.elapsed().as_secs_f64()))
            }
        }
    }
}

/// Every item of `batch` reported failed with `reason`
pub fn degraded(batch: &DataBatch, reason: &str, processing_time_seconds: f64) -> BatchProcessingResult {
    let item_ids: Vec<Uuid> = batch.items().iter().map(DataItem::id).collect();
    BatchProcessingResult::degraded(batch.id(), &item_ids, reason, processing_time_seconds)
}
