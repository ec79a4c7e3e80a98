mod common;

use batchflow_core::constants::ActivityStatus;
use batchflow_core::execution::{ExecutionContext, LocalSubstrate, RetryPolicy, Substrate, UnitContext, UnitOptions};
use batchflow_core::models::LongRunningOperationInput;
use batchflow_core::processing::LongRunningProcessor;
use common::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_failed_batches_are_counted_and_skipped() {
    let runner = Arc::new(FailingBatchesRunner::new([2, 6]));
    let processor = LongRunningProcessor::new(runner.clone());
    let operation = LongRunningOperationInput::new("reindex", 10_000).with_work_unit_size(1000);
    let ctx = UnitContext::standalone("reindex", None);

    let output = processor.run(&operation, &ctx).await.unwrap();

    assert_eq!(runner.calls(), 10);
    assert_eq!(output.status, ActivityStatus::Completed);
    assert_eq!(output.completed_work_units, 8000);
    assert_eq!(output.failed_work_units, 2000);
    assert_eq!(output.total_work_units, 10_000);
    assert!(output.is_partial());
    assert!(output.final_result.contains_key("processing_summary"));
}

#[tokio::test]
async fn test_every_batch_failing_reports_failed() {
    let runner = Arc::new(FailingBatchesRunner::new(0..5));
    let processor = LongRunningProcessor::new(runner);
    let operation = LongRunningOperationInput::new("reindex", 500).with_work_unit_size(100);
    let ctx = UnitContext::standalone("reindex", None);

    let output = processor.run(&operation, &ctx).await.unwrap();

    assert_eq!(output.status, ActivityStatus::Failed);
    assert_eq!(output.completed_work_units, 0);
    assert_eq!(output.failed_work_units, 500);
    assert!(!output.is_partial());
}

#[tokio::test]
async fn test_cancellation_propagates() {
    let processor = LongRunningProcessor::new(Arc::new(FailingBatchesRunner::default()));
    let operation = LongRunningOperationInput::new("reindex", 3000);
    let ctx = UnitContext::standalone("reindex", None);
    ctx.cancellation().cancel();

    let error = processor.run(&operation, &ctx).await.unwrap_err();
    assert!(error.is_cancellation());
}

#[tokio::test(start_paused = true)]
async fn test_runs_under_unit_supervision_with_heartbeats() {
    let substrate = LocalSubstrate::new();
    let processor = Arc::new(LongRunningProcessor::default());
    let operation = Arc::new(
        LongRunningOperationInput::new("post_processing", 200)
            .with_work_unit_size(50)
            .with_intervals(1, 1)
            .with_parameter("complexity_factor", serde_json::json!(1.0)),
    );
    // 50 units at 100ms each is 5s per batch; heartbeats keep the 2s window alive
    let options = UnitOptions::new("long_running_post_processing", Duration::from_secs(600))
        .with_heartbeat_timeout(Duration::from_secs(2))
        .with_retry_policy(RetryPolicy::no_retry());

    let output = substrate
        .execute_unit(options, move |ctx| {
            let processor = Arc::clone(&processor);
            let operation = Arc::clone(&operation);
            async move { processor.run(&operation, &*ctx).await }
        })
        .await
        .unwrap();

    assert_eq!(output.status, ActivityStatus::Completed);
    assert_eq!(output.completed_work_units, 200);
    assert_eq!(output.failed_work_units, 0);
    assert!(!output.progress_history.is_empty());
    assert!(output
        .progress_history
        .windows(2)
        .all(|w| w[0].completed_work_units <= w[1].completed_work_units));
}
