//! Item and batch outcomes.

use crate::constants::ActivityStatus;
use crate::error::{BatchflowError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Outcome of processing one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub item_id: Uuid,
    pub status: ActivityStatus,
    /// Present only when `status` is `completed`
    pub processed_content: Option<String>,
    pub processing_time_seconds: f64,
    pub error_message: Option<String>,
    pub retry_count: u32,
    #[serde(default)]
    pub output_metadata: HashMap<String, serde_json::Value>,
}

impl ProcessingResult {
    fn base(item_id: Uuid, status: ActivityStatus, processing_time_seconds: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            item_id,
            status,
            processed_content: None,
            processing_time_seconds,
            error_message: None,
            retry_count: 0,
            output_metadata: HashMap::new(),
        }
    }

    pub fn completed(
        item_id: Uuid,
        processed_content: String,
        processing_time_seconds: f64,
        output_metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            processed_content: Some(processed_content),
            output_metadata,
            ..Self::base(item_id, ActivityStatus::Completed, processing_time_seconds)
        }
    }

    pub fn failed(item_id: Uuid, error_message: impl Into<String>, processing_time_seconds: f64) -> Self {
        Self {
            error_message: Some(error_message.into()),
            ..Self::base(item_id, ActivityStatus::Failed, processing_time_seconds)
        }
    }

    pub fn timed_out(item_id: Uuid, error_message: impl Into<String>, processing_time_seconds: f64) -> Self {
        Self {
            error_message: Some(error_message.into()),
            ..Self::base(item_id, ActivityStatus::Timeout, processing_time_seconds)
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Aggregate outcome of one batch.
///
/// `successful_items + failed_items == total_items` holds for every value;
/// constructors additionally keep `item_results.len() == total_items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBatchResult")]
pub struct BatchProcessingResult {
    id: Uuid,
    created_at: DateTime<Utc>,
    batch_id: Uuid,
    total_items: usize,
    successful_items: usize,
    failed_items: usize,
    processing_time_seconds: f64,
    item_results: Vec<ProcessingResult>,
}

#[derive(Deserialize)]
struct RawBatchResult {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    batch_id: Uuid,
    total_items: usize,
    successful_items: usize,
    failed_items: usize,
    processing_time_seconds: f64,
    #[serde(default)]
    item_results: Vec<ProcessingResult>,
}

impl TryFrom<RawBatchResult> for BatchProcessingResult {
    type Error = BatchflowError;

    fn try_from(raw: RawBatchResult) -> Result<Self> {
        let counted = raw.successful_items.checked_add(raw.failed_items);
        if counted != Some(raw.total_items) {
            return Err(BatchflowError::validation(
                format!(
                    "successful_items ({}) + failed_items ({}) must equal total_items ({})",
                    raw.successful_items, raw.failed_items, raw.total_items
                ),
                "failed_items",
            ));
        }
        Ok(Self {
            id: raw.id,
            created_at: raw.created_at,
            batch_id: raw.batch_id,
            total_items: raw.total_items,
            successful_items: raw.successful_items,
            failed_items: raw.failed_items,
            processing_time_seconds: raw.processing_time_seconds,
            item_results: raw.item_results,
        })
    }
}

impl BatchProcessingResult {
    /// Aggregate item results; counts are derived, never supplied
    pub fn from_item_results(
        batch_id: Uuid,
        item_results: Vec<ProcessingResult>,
        processing_time_seconds: f64,
    ) -> Self {
        let total_items = item_results.len();
        let successful_items = item_results.iter().filter(|r| r.is_success()).count();
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            batch_id,
            total_items,
            successful_items,
            failed_items: total_items - successful_items,
            processing_time_seconds,
            item_results,
        }
    }

    /// Result for a batch whose unit exhausted its retries: every item failed
    pub fn degraded(batch_id: Uuid, item_ids: &[Uuid], reason: &str, processing_time_seconds: f64) -> Self {
        let item_results = item_ids
            .iter()
            .map(|item_id| ProcessingResult::failed(*item_id, reason, 0.0))
            .collect();
        Self::from_item_results(batch_id, item_results, processing_time_seconds)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    pub fn successful_items(&self) -> usize {
        self.successful_items
    }

    pub fn failed_items(&self) -> usize {
        self.failed_items
    }

    pub fn processing_time_seconds(&self) -> f64 {
        self.processing_time_seconds
    }

    pub fn item_results(&self) -> &[ProcessingResult] {
        &self.item_results
    }

    pub fn is_fully_successful(&self) -> bool {
        self.successful_items == self.total_items
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        self.successful_items as f64 / self.total_items as f64 * 100.0
    }
}
