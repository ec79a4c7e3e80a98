//! # Long-Running Operation Processor
//!
//! Drives a large number of work units through chunked batches, heartbeating
//! and recording progress snapshots along the way. A failed batch is counted
//! and skipped. Resource exhaustion and cancellation propagate so the
//! supervising unit can retry or stop; any other unrecoverable error becomes
//! a `failed` output that keeps the progress gathered so far.
//!
//! ```rust
//! use batchflow_core::execution::UnitContext;
//! use batchflow_core::models::LongRunningOperationInput;
//! use batchflow_core::processing::{LongRunningProcessor, SimulatedWorkRunner};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let processor = LongRunningProcessor::new(Arc::new(SimulatedWorkRunner::new(Duration::ZERO)));
//! let operation = LongRunningOperationInput::new("reindex", 2500);
//! let ctx = UnitContext::standalone("reindex", None);
//!
//! let output = processor.run(&operation, &ctx).await.unwrap();
//! assert_eq!(output.completed_work_units, 2500);
//! # });
//! ```

use crate::constants::{system, ActivityStatus};
use crate::error::{BatchflowError, Result};
use crate::execution::ExecutionContext;
use crate::models::{LongRunningOperationInput, LongRunningOperationOutput, ProgressUpdate};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Performs one batch of work units
#[async_trait]
pub trait WorkUnitRunner: Send + Sync {
    /// Process `units` work units for the zero-based `batch_index`
    async fn run_batch(
        &self,
        operation: &LongRunningOperationInput,
        batch_index: u64,
        units: u64,
        ctx: &dyn ExecutionContext,
    ) -> Result<()>;
}

/// Simulated runner: each unit costs `unit_cost * complexity_factor`
#[derive(Debug, Clone)]
pub struct SimulatedWorkRunner {
    unit_cost: Duration,
    chunk: Duration,
}

impl Default for SimulatedWorkRunner {
    fn default() -> Self {
        Self {
            unit_cost: Duration::from_millis(100),
            chunk: Duration::from_millis(500),
        }
    }
}

impl SimulatedWorkRunner {
    pub fn new(unit_cost: Duration) -> Self {
        Self {
            unit_cost,
            ..Self::default()
        }
    }
}

#[async_trait]
impl WorkUnitRunner for SimulatedWorkRunner {
    async fn run_batch(
        &self,
        operation: &LongRunningOperationInput,
        batch_index: u64,
        units: u64,
        ctx: &dyn ExecutionContext,
    ) -> Result<()> {
        let total = self
            .unit_cost
            .mul_f64(units as f64 * operation.complexity_factor());
        let mut remaining = total;
        while !remaining.is_zero() {
            let slice = remaining.min(self.chunk);
            tokio::time::sleep(slice).await;
            remaining -= slice;
            if ctx.is_cancelled() {
                return Err(BatchflowError::cancelled(operation.operation_type.clone()));
            }
            ctx.heartbeat(&format!("Work batch {} in progress", batch_index + 1));
        }
        Ok(())
    }
}

pub struct LongRunningProcessor {
    runner: Arc<dyn WorkUnitRunner>,
}

impl std::fmt::Debug for LongRunningProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongRunningProcessor").finish_non_exhaustive()
    }
}

impl Default for LongRunningProcessor {
    fn default() -> Self {
        Self::new(Arc::new(SimulatedWorkRunner::default()))
    }
}

struct RunState {
    started: Instant,
    completed_units: u64,
    failed_units: u64,
    progress_history: Vec<ProgressUpdate>,
}

impl LongRunningProcessor {
    pub fn new(runner: Arc<dyn WorkUnitRunner>) -> Self {
        Self { runner }
    }

    pub async fn run(
        &self,
        operation: &LongRunningOperationInput,
        ctx: &dyn ExecutionContext,
    ) -> Result<LongRunningOperationOutput> {
        let mut state = RunState {
            started: ctx.now(),
            completed_units: 0,
            failed_units: 0,
            progress_history: Vec::new(),
        };

        info!(
            operation_id = %operation.id,
            operation_type = %operation.operation_type,
            total_work_units = operation.total_work_units,
            work_unit_size = operation.work_unit_size,
            "Starting long-running operation"
        );

        match self.drive(operation, ctx, &mut state).await {
            Ok(total_batches) => Ok(Self::finish(operation, state, total_batches)),
            Err(error)
                if error.is_cancellation()
                    || matches!(error, BatchflowError::InsufficientResources { .. }) =>
            {
                warn!(
                    operation_id = %operation.id,
                    error = %error,
                    "Long-running operation interrupted"
                );
                Err(error)
            }
            Err(error) => Ok(Self::abort(operation, state, &error)),
        }
    }

    async fn drive(
        &self,
        operation: &LongRunningOperationInput,
        ctx: &dyn ExecutionContext,
        state: &mut RunState,
    ) -> Result<u64> {
        operation.validate()?;

        let units_per_batch = operation.work_unit_size.min(system::LONG_RUNNING_UNIT_CAP);
        let total_batches = operation.total_work_units.div_ceil(units_per_batch);

        debug!(
            operation_id = %operation.id,
            units_per_batch = units_per_batch,
            total_batches = total_batches,
            "Long-running operation plan"
        );

        let mut last_heartbeat = state.started;
        let mut last_progress = state.started;

        for batch_index in 0..total_batches {
            if ctx.is_cancelled() {
                return Err(BatchflowError::cancelled(operation.operation_type.clone()));
            }

            let processed = state.completed_units + state.failed_units;
            let units = units_per_batch.min(operation.total_work_units - processed);

            match self.runner.run_batch(operation, batch_index, units, ctx).await {
                Ok(()) => state.completed_units += units,
                Err(error)
                    if error.is_cancellation()
                        || matches!(
                            error,
                            BatchflowError::InsufficientResources { .. }
                                | BatchflowError::ConfigurationError { .. }
                                | BatchflowError::ValidationError { .. }
                        ) =>
                {
                    return Err(error);
                }
                Err(error) => {
                    error!(
                        operation_id = %operation.id,
                        batch = batch_index + 1,
                        error = %error,
                        "Work unit batch failed"
                    );
                    state.failed_units += units;
                }
            }

            let now = ctx.now();

            if operation.enable_heartbeat
                && now.duration_since(last_heartbeat) >= operation.heartbeat_interval()
            {
                ctx.heartbeat(&format!(
                    "Processed {}/{} work units ({} failed)",
                    state.completed_units, operation.total_work_units, state.failed_units
                ));
                last_heartbeat = now;
            }

            if operation.enable_progress_updates
                && now.duration_since(last_progress) >= operation.progress_update_interval()
            {
                let mut update = ProgressUpdate::new(
                    operation.id,
                    state.completed_units,
                    operation.total_work_units,
                    now.duration_since(state.started),
                );
                update.current_stage = format!("Batch {}/{}", batch_index + 1, total_batches);

                info!(
                    operation_id = %operation.id,
                    progress_percentage = update.progress_percentage,
                    throughput = update.throughput_units_per_second,
                    eta_seconds = ?update.estimated_remaining_seconds,
                    "Progress update"
                );
                state.progress_history.push(update);
                last_progress = now;
            }
        }

        Ok(total_batches)
    }

    fn finish(
        operation: &LongRunningOperationInput,
        state: RunState,
        total_batches: u64,
    ) -> LongRunningOperationOutput {
        let elapsed = state.started.elapsed().as_secs_f64();
        let average_throughput = if elapsed > 0.0 {
            state.completed_units as f64 / elapsed
        } else {
            0.0
        };

        let status = if state.completed_units == 0 {
            ActivityStatus::Failed
        } else {
            ActivityStatus::Completed
        };

        let peak_throughput = state
            .progress_history
            .iter()
            .map(|p| p.throughput_units_per_second)
            .fold(0.0, f64::max);

        let mut final_result = HashMap::new();
        final_result.insert(
            "processing_summary".to_string(),
            json!({
                "total_batches_processed": total_batches,
                "successful_units": state.completed_units,
                "failed_units": state.failed_units,
                "success_rate": state.completed_units as f64 / operation.total_work_units as f64 * 100.0,
                "average_batch_time_seconds": elapsed / total_batches.max(1) as f64,
            }),
        );
        final_result.insert(
            "performance_metrics".to_string(),
            json!({
                "total_processing_time_seconds": elapsed,
                "average_throughput_units_per_second": average_throughput,
                "peak_throughput_units_per_second": peak_throughput,
            }),
        );
        final_result.insert("operation_metadata".to_string(), json!(operation.parameters));

        info!(
            operation_id = %operation.id,
            status = %status,
            completed_units = state.completed_units,
            failed_units = state.failed_units,
            processing_time_seconds = elapsed,
            "Long-running operation finished"
        );

        LongRunningOperationOutput {
            operation_id: operation.id,
            operation_type: operation.operation_type.clone(),
            status,
            total_work_units: operation.total_work_units,
            completed_work_units: state.completed_units,
            failed_work_units: state.failed_units,
            execution_time_seconds: elapsed,
            average_throughput,
            final_result,
            progress_history: state.progress_history,
        }
    }

    fn abort(
        operation: &LongRunningOperationInput,
        state: RunState,
        error: &BatchflowError,
    ) -> LongRunningOperationOutput {
        let message = format!("Large dataset processing failed: {error}");
        error!(operation_id = %operation.id, error_code = %error.code(), "{message}");

        let mut final_result = HashMap::new();
        final_result.insert("error".to_string(), json!(message));
        final_result.insert("error_code".to_string(), json!(error.code()));

        LongRunningOperationOutput {
            operation_id: operation.id,
            operation_type: operation.operation_type.clone(),
            status: ActivityStatus::Failed,
            total_work_units: operation.total_work_units,
            completed_work_units: state.completed_units,
            failed_work_units: operation.total_work_units - state.completed_units.min(operation.total_work_units),
            execution_time_seconds: state.started.elapsed().as_secs_f64(),
            average_throughput: 0.0,
            final_result,
            progress_history: state.progress_history,
        }
    }
}
