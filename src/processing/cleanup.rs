//! Artifact cleanup after a long-running operation.
//!
//! Each task in [`system::CLEANUP_TASKS`] runs once. A failed task is recorded
//! and the rest still run; only cancellation stops the sequence early.

use crate::constants::system;
use crate::error::{BatchflowError, Result};
use crate::execution::ExecutionContext;
use crate::models::{CleanupFailure, CleanupResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Performs one named cleanup task for an operation
#[async_trait]
pub trait ArtifactCleaner: Send + Sync {
    async fn clean(&self, operation_id: &str, task: &str, ctx: &dyn ExecutionContext) -> Result<()>;
}

/// Every task takes `task_cost` and succeeds
#[derive(Debug, Clone)]
pub struct SimulatedArtifactCleaner {
    task_cost: Duration,
}

impl Default for SimulatedArtifactCleaner {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl SimulatedArtifactCleaner {
    pub fn new(task_cost: Duration) -> Self {
        Self { task_cost }
    }
}

#[async_trait]
impl ArtifactCleaner for SimulatedArtifactCleaner {
    async fn clean(&self, _operation_id: &str, _task: &str, _ctx: &dyn ExecutionContext) -> Result<()> {
        tokio::time::sleep(self.task_cost).await;
        Ok(())
    }
}

pub struct ArtifactCleanup {
    cleaner: Arc<dyn ArtifactCleaner>,
}

impl std::fmt::Debug for ArtifactCleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCleanup").finish_non_exhaustive()
    }
}

impl Default for ArtifactCleanup {
    fn default() -> Self {
        Self::new(Arc::new(SimulatedArtifactCleaner::default()))
    }
}

impl ArtifactCleanup {
    pub fn new(cleaner: Arc<dyn ArtifactCleaner>) -> Self {
        Self { cleaner }
    }

    pub async fn cleanup_processing_artifacts(
        &self,
        operation_id: &str,
        ctx: &dyn ExecutionContext,
    ) -> Result<CleanupResult> {
        let started = ctx.now();
        info!(operation_id = %operation_id, "🧹 Starting cleanup of processing artifacts");

        let mut completed = Vec::new();
        let mut failed = Vec::new();

        for task in system::CLEANUP_TASKS {
            if ctx.is_cancelled() {
                return Err(BatchflowError::cancelled(format!("cleanup:{operation_id}")));
            }

            match self.cleaner.clean(operation_id, task, ctx).await {
                Ok(()) => {
                    debug!(operation_id = %operation_id, task = task, "Cleanup task completed");
                    completed.push(task.to_string());
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    error!(operation_id = %operation_id, task = task, error = %e, "Cleanup task failed");
                    failed.push(CleanupFailure {
                        task: task.to_string(),
                        error: e.to_string(),
                    });
                }
            }
            ctx.heartbeat(&format!("Cleanup: {task}"));
        }

        let result = CleanupResult::new(operation_id, completed, failed, started.elapsed());
        info!(
            operation_id = %operation_id,
            completed_tasks = result.completed_tasks.len(),
            failed_tasks = result.failed_tasks.len(),
            cleanup_time_seconds = result.cleanup_time_seconds,
            "Cleanup completed"
        );
        Ok(result)
    }
}
