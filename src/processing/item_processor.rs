//! # Item Processor
//!
//! Transforms a single [`DataItem`]. Work time is simulated from the item size,
//! sliced into chunks with a heartbeat after each one so a supervising
//! heartbeat timeout only fires for genuinely stalled work.
//!
//! Data problems (failed validation, checksum mismatch) come back as a `failed`
//! [`ProcessingResult`]. Anything else is wrapped in a
//! [`BatchflowError::DataProcessingError`] and returned as an error so the
//! surrounding retry policy can decide what to do.

use crate::constants::system;
use crate::error::{BatchflowError, Result};
use crate::execution::ExecutionContext;
use crate::models::{DataItem, ProcessingResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Content transformation applied to each item
#[async_trait]
pub trait ItemTransform: Send + Sync {
    /// Tag recorded as `processing_method` in the output metadata
    fn method(&self) -> &str;

    async fn transform(&self, item: &DataItem) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UppercaseTransform;

#[async_trait]
impl ItemTransform for UppercaseTransform {
    fn method(&self) -> &str {
        "uppercase_transform"
    }

    async fn transform(&self, item: &DataItem) -> Result<String> {
        Ok(item.content().to_uppercase())
    }
}

/// Hex-encoded SHA-256 of the content, prefixed with `sha256:`
pub fn sha256_checksum(content: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content.as_bytes())))
}

pub struct ItemProcessor {
    transform: Arc<dyn ItemTransform>,
    bytes_per_second: f64,
    max_processing_time: Duration,
    heartbeat_chunk: Duration,
}

impl std::fmt::Debug for ItemProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemProcessor")
            .field("method", &self.transform.method())
            .field("bytes_per_second", &self.bytes_per_second)
            .field("max_processing_time", &self.max_processing_time)
            .finish()
    }
}

impl Default for ItemProcessor {
    fn default() -> Self {
        Self::new(Arc::new(UppercaseTransform))
    }
}

impl ItemProcessor {
    pub fn new(transform: Arc<dyn ItemTransform>) -> Self {
        Self {
            transform,
            bytes_per_second: system::SIMULATED_BYTES_PER_SECOND,
            max_processing_time: system::MAX_ITEM_PROCESSING_TIME,
            heartbeat_chunk: Duration::from_secs(1),
        }
    }

    /// Override the simulated throughput and the per-item cap
    pub fn with_timing(mut self, bytes_per_second: f64, max_processing_time: Duration) -> Self {
        self.bytes_per_second = bytes_per_second;
        self.max_processing_time = max_processing_time;
        self
    }

    /// Simulated processing time: `min(size / bytes_per_second, max)`
    pub fn processing_delay(&self, item: &DataItem) -> Duration {
        if self.bytes_per_second <= 0.0 {
            return self.max_processing_time;
        }
        let seconds = item.size_bytes() as f64 / self.bytes_per_second;
        Duration::from_secs_f64(seconds).min(self.max_processing_time)
    }

    pub async fn process(
        &self,
        item: &DataItem,
        ctx: &dyn ExecutionContext,
    ) -> Result<ProcessingResult> {
        let started = ctx.now();
        let retry_count = ctx.attempt().saturating_sub(1);

        if ctx.is_cancelled() {
            return Err(BatchflowError::cancelled(format!("process_item {}", item.id())));
        }

        info!(
            item_id = %item.id(),
            content_type = %item.content_type(),
            size_bytes = item.size_bytes(),
            "Starting item processing"
        );

        let delay = self.processing_delay(item);
        if let Some(budget) = ctx.heartbeat_timeout() {
            if delay > budget {
                let message = format!(
                    "Processing time {:.2}s would exceed heartbeat timeout {:.2}s",
                    delay.as_secs_f64(),
                    budget.as_secs_f64()
                );
                warn!(item_id = %item.id(), "{message}");
                return Ok(ProcessingResult::timed_out(item.id(), message, 0.0)
                    .with_retry_count(retry_count));
            }
        }

        match self.run(item, ctx, delay).await {
            Ok(processed) => {
                let elapsed = started.elapsed().as_secs_f64();
                let mut metadata = HashMap::new();
                metadata.insert("original_size".to_string(), item.size_bytes().into());
                metadata.insert("processed_size".to_string(), processed.len().into());
                metadata.insert("content_type".to_string(), item.content_type().into());
                metadata.insert("processing_method".to_string(), self.transform.method().into());

                info!(
                    item_id = %item.id(),
                    processing_time_seconds = elapsed,
                    "Item processing completed"
                );
                Ok(ProcessingResult::completed(item.id(), processed, elapsed, metadata)
                    .with_retry_count(retry_count))
            }
            Err(error) if error.is_cancellation() => Err(error),
            Err(error) if error.is_data_error() => {
                let elapsed = started.elapsed().as_secs_f64();
                warn!(item_id = %item.id(), error = %error, "Item rejected");
                Ok(ProcessingResult::failed(item.id(), error.to_string(), elapsed)
                    .with_retry_count(retry_count))
            }
            Err(error) => {
                error!(
                    item_id = %item.id(),
                    error_code = %error.code(),
                    error = %error,
                    "Item processing failed"
                );
                Err(BatchflowError::DataProcessingError {
                    message: format!("Item processing failed: {error}"),
                    data_type: Some("DataItem".to_string()),
                    record_count: Some(1),
                })
            }
        }
    }

    async fn run(&self, item: &DataItem, ctx: &dyn ExecutionContext, delay: Duration) -> Result<String> {
        let mut remaining = delay;
        while !remaining.is_zero() {
            let chunk = remaining.min(self.heartbeat_chunk);
            tokio::time::sleep(chunk).await;
            remaining -= chunk;

            if ctx.is_cancelled() {
                return Err(BatchflowError::cancelled(format!("process_item {}", item.id())));
            }
            ctx.heartbeat(&format!("Processing item {}", item.id()));
        }

        let processed = self.transform.transform(item).await?;
        verify_checksum(item)?;
        Ok(processed)
    }
}

fn verify_checksum(item: &DataItem) -> Result<()> {
    let Some(expected) = item.checksum() else {
        return Ok(());
    };

    let expected = expected
        .strip_prefix("sha256:")
        .unwrap_or(expected)
        .to_ascii_lowercase();
    let actual = hex::encode(Sha256::digest(item.content().as_bytes()));

    if expected != actual {
        return Err(BatchflowError::DataCorruptionError {
            item_id: item.id().to_string(),
            expected,
            actual,
        });
    }

    debug!(item_id = %item.id(), "Checksum validated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ActivityStatus;
    use crate::execution::UnitContext;

    struct BrokenTransform;

    #[async_trait]
    impl ItemTransform for BrokenTransform {
        fn method(&self) -> &str {
            "broken"
        }

        async fn transform(&self, _item: &DataItem) -> Result<String> {
            Err(BatchflowError::processing("downstream codec crashed"))
        }
    }

    fn ctx() -> UnitContext {
        UnitContext::standalone("process_item", Some(Duration::from_secs(30)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_uppercase_with_metadata_and_heartbeats() {
        let processor = ItemProcessor::default();
        let item = DataItem::new("hello world", "text/plain", 25_000).unwrap();
        let ctx = ctx();

        let result = processor.process(&item, &ctx).await.unwrap();

        assert_eq!(result.status, ActivityStatus::Completed);
        assert_eq!(result.processed_content.as_deref(), Some("HELLO WORLD"));
        assert_eq!(result.output_metadata["original_size"], 25_000);
        assert_eq!(result.output_metadata["processed_size"], 11);
        assert_eq!(result.output_metadata["processing_method"], "uppercase_transform");
        // 2.5s of simulated work in 1s slices
        assert_eq!(ctx.heartbeat_count(), 3);
        assert!(result.processing_time_seconds >= 2.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_delay_is_capped() {
        let processor = ItemProcessor::default();
        let huge = DataItem::new("x", "text/plain", 10_000_000).unwrap();
        assert_eq!(processor.processing_delay(&huge), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_result_when_budget_too_small() {
        let processor = ItemProcessor::default();
        let item = DataItem::new("slow", "text/plain", 80_000).unwrap();
        let ctx = UnitContext::standalone("process_item", Some(Duration::from_secs(5)));

        let result = processor.process(&item, &ctx).await.unwrap();
        assert_eq!(result.status, ActivityStatus::Timeout);
        assert!(result.processed_content.is_none());
        assert_eq!(ctx.heartbeat_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checksum_validation() {
        let processor = ItemProcessor::default();
        let ctx = ctx();

        let good = DataItem::from_text("payload")
            .unwrap()
            .with_checksum(sha256_checksum("payload"));
        let result = processor.process(&good, &ctx).await.unwrap();
        assert_eq!(result.status, ActivityStatus::Completed);

        let corrupt = DataItem::from_text("payload")
            .unwrap()
            .with_checksum(sha256_checksum("tampered"));
        let result = processor.process(&corrupt, &ctx).await.unwrap();
        assert_eq!(result.status, ActivityStatus::Failed);
        assert!(result
            .error_message
            .unwrap()
            .contains("Data corruption detected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_infrastructure_errors_are_signalled() {
        let processor = ItemProcessor::new(Arc::new(BrokenTransform));
        let item = DataItem::from_text("payload").unwrap();

        let error = processor.process(&item, &ctx()).await.unwrap_err();
        assert!(matches!(error, BatchflowError::DataProcessingError { .. }));
        assert!(error.is_retryable());
        assert!(error.to_string().contains("downstream codec crashed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_context_stops_processing() {
        let processor = ItemProcessor::default();
        let item = DataItem::from_text("payload").unwrap();
        let ctx = ctx();
        ctx.cancellation().cancel();

        let error = processor.process(&item, &ctx).await.unwrap_err();
        assert!(error.is_cancellation());
    }
}
