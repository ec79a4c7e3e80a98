//! Batch execution through the in-process substrate: item faults stay inside
//! their batch, and a batch that cannot finish degrades instead of failing.

mod common;

use async_trait::async_trait;
use batchflow_core::config::WorkflowSettings;
use batchflow_core::constants::{ActivityStatus, Priority, ProcessingMode};
use batchflow_core::error::Result;
use batchflow_core::execution::{LocalSubstrate, Substrate};
use batchflow_core::models::{BatchProcessingResult, DataBatch, DataItem, WorkflowInput};
use batchflow_core::orchestration::BatchWorkflow;
use batchflow_core::processing::{
    sha256_checksum, BatchExecutor, ItemProcessor, ItemTransform, UppercaseTransform,
};
use common::*;
use std::sync::Arc;

fn executor(transform: impl ItemTransform + 'static) -> Arc<BatchExecutor> {
    Arc::new(BatchExecutor::new(
        Arc::new(ItemProcessor::new(Arc::new(transform))),
        10,
    ))
}

async fn run_batch(executor: Arc<BatchExecutor>, batch: DataBatch) -> BatchProcessingResult {
    let substrate = LocalSubstrate::new();
    let input = WorkflowInput::new("dataset-batch", vec![batch.clone()]);
    let workflow = BatchWorkflow::new(
        substrate,
        executor,
        fast_workflow_settings(),
        &input,
    );
    workflow
        .run_or_degrade(&input.id.to_string(), 0, Arc::new(batch))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_all_items_succeed() {
    let batch = text_batch(5, ProcessingMode::Parallel);
    let result = run_batch(executor(UppercaseTransform), batch.clone()).await;

    assert_eq!(result.batch_id(), batch.id());
    assert_eq!(result.total_items(), 5);
    assert_eq!(result.successful_items(), 5);
    assert_eq!(result.failed_items(), 0);
    assert!(result.is_fully_successful());
    assert_eq!(result.item_results()[0].processed_content.as_deref(), Some("ROW 1"));
    assert_eq!(
        result.item_results()[0].output_metadata.get("processing_method"),
        Some(&serde_json::json!("uppercase_transform"))
    );
}

#[tokio::test]
async fn test_unexpected_item_fault_stays_in_its_batch() {
    let batch = text_batch(5, ProcessingMode::Parallel);
    let result = run_batch(executor(FaultOnContent::new("row 3")), batch.clone()).await;

    assert_eq!(result.successful_items(), 4);
    assert_eq!(result.failed_items(), 1);

    let failed = &result.item_results()[2];
    assert_eq!(failed.item_id, batch.items()[2].id());
    assert_eq!(failed.status, ActivityStatus::Failed);
    assert!(failed
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("injected fault")));
}

#[tokio::test]
async fn test_checksum_mismatch_fails_only_that_item() {
    let good = DataItem::from_text("alpha").unwrap().with_checksum(sha256_checksum("alpha"));
    let bad = DataItem::from_text("beta").unwrap().with_checksum(sha256_checksum("not beta"));
    let batch = DataBatch::from_items(vec![good, bad], ProcessingMode::Sequential, Priority::High).unwrap();

    let result = run_batch(executor(UppercaseTransform), batch).await;

    assert_eq!(result.successful_items(), 1);
    assert_eq!(result.item_results()[1].status, ActivityStatus::Failed);
    assert_eq!(result.item_results()[1].retry_count, 0);
}

#[tokio::test]
async fn test_sequential_results_follow_input_order() {
    let batch = text_batch(6, ProcessingMode::Sequential);
    let result = run_batch(executor(UppercaseTransform), batch.clone()).await;

    let expected: Vec<String> = batch.items().iter().map(|i| i.content().to_uppercase()).collect();
    let actual: Vec<String> = result
        .item_results()
        .iter()
        .filter_map(|r| r.processed_content.clone())
        .collect();
    assert_eq!(actual, expected);
}

struct PanickingTransform;

#[async_trait]
impl ItemTransform for PanickingTransform {
    fn method(&self) -> &str {
        "panicking_transform"
    }

    async fn transform(&self, _item: &DataItem) -> Result<String> {
        panic!("transform blew up");
    }
}

#[tokio::test]
async fn test_batch_that_cannot_finish_is_degraded() {
    let batch = text_batch(3, ProcessingMode::Sequential);
    let input = WorkflowInput::new("dataset-degraded", vec![batch.clone()]).with_retry(false);
    let workflow = BatchWorkflow::new(
        LocalSubstrate::new(),
        executor(PanickingTransform),
        WorkflowSettings::default(),
        &input,
    );

    let result = workflow
        .run_or_degrade("wf-degraded", 0, Arc::new(batch.clone()))
        .await
        .unwrap();

    assert_eq!(result.batch_id(), batch.id());
    assert_eq!(result.total_items(), 3);
    assert_eq!(result.failed_items(), 3);
    assert!(result
        .item_results()
        .iter()
        .all(|r| r.status == ActivityStatus::Failed && r.error_message.is_some()));
}

#[tokio::test]
async fn test_cancelled_batch_is_not_degraded() {
    let substrate = LocalSubstrate::new();
    substrate.cancellation().cancel();
    let batch = text_batch(2, ProcessingMode::Parallel);
    let input = WorkflowInput::new("dataset-cancelled", vec![batch.clone()]);
    let workflow = BatchWorkflow::new(
        substrate,
        executor(UppercaseTransform),
        fast_workflow_settings(),
        &input,
    );

    let error = workflow
        .run_or_degrade("wf-cancelled", 0, Arc::new(batch))
        .await
        .unwrap_err();
    assert!(error.is_cancellation());
}
