//! Top-level workflow request and result records.

use crate::constants::{PostProcessingStatus, WorkflowStatus};
use crate::error::{BatchflowError, Result};
use crate::models::{BatchProcessingResult, CleanupResult, DataBatch, ValidationStatistics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-workflow processing switches, validated at the orchestrator boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Run batches one after another instead of a bounded fan-out
    #[serde(default)]
    pub sequential: bool,
    /// Attempts granted to each batch child unit
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub enable_post_processing: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            sequential: false,
            max_retries: default_max_retries(),
            enable_post_processing: false,
        }
    }
}

impl ProcessingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(BatchflowError::validation_value(
                "max_retries must be at least 1",
                "processing_config.max_retries",
                self.max_retries,
            ));
        }
        Ok(())
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_execution_timeout_seconds() -> u64 {
    3600
}

fn default_parallel_batches() -> usize {
    5
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInput {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub dataset_id: String,
    pub batches: Vec<DataBatch>,
    #[serde(default)]
    pub processing_config: ProcessingConfig,
    #[serde(default = "default_execution_timeout_seconds")]
    pub execution_timeout_seconds: u64,
    /// Maximum number of batches in flight at once
    #[serde(default = "default_parallel_batches")]
    pub parallel_batches: usize,
    #[serde(default = "default_true")]
    pub enable_retry: bool,
    #[serde(default)]
    pub notification_webhook: Option<String>,
}

impl WorkflowInput {
    pub fn new(dataset_id: impl Into<String>, batches: Vec<DataBatch>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            dataset_id: dataset_id.into(),
            batches,
            processing_config: ProcessingConfig::default(),
            execution_timeout_seconds: default_execution_timeout_seconds(),
            parallel_batches: default_parallel_batches(),
            enable_retry: true,
            notification_webhook: None,
        }
    }

    pub fn with_processing_config(mut self, processing_config: ProcessingConfig) -> Self {
        self.processing_config = processing_config;
        self
    }

    pub fn with_parallel_batches(mut self, parallel_batches: usize) -> Self {
        self.parallel_batches = parallel_batches;
        self
    }

    pub fn with_notification_webhook(mut self, webhook: impl Into<String>) -> Self {
        self.notification_webhook = Some(webhook.into());
        self
    }

    pub fn with_execution_timeout(mut self, seconds: u64) -> Self {
        self.execution_timeout_seconds = seconds;
        self
    }

    pub fn with_retry(mut self, enable_retry: bool) -> Self {
        self.enable_retry = enable_retry;
        self
    }

    pub fn total_items(&self) -> usize {
        self.batches.iter().map(DataBatch::batch_size).sum()
    }

    pub fn validate(&self) -> Result<()> {
        if self.dataset_id.trim().is_empty() {
            return Err(BatchflowError::validation(
                "dataset_id cannot be empty",
                "dataset_id",
            ));
        }
        if self.batches.is_empty() {
            return Err(BatchflowError::validation(
                "Workflow requires at least one batch",
                "batches",
            ));
        }
        if self.parallel_batches == 0 {
            return Err(BatchflowError::validation_value(
                "parallel_batches must be at least 1",
                "parallel_batches",
                self.parallel_batches,
            ));
        }
        if self.execution_timeout_seconds == 0 {
            return Err(BatchflowError::validation_value(
                "execution_timeout_seconds must be positive",
                "execution_timeout_seconds",
                self.execution_timeout_seconds,
            ));
        }
        if let Some(webhook) = &self.notification_webhook {
            reqwest::Url::parse(webhook).map_err(|e| {
                BatchflowError::validation_value(
                    format!("Invalid notification webhook: {e}"),
                    "notification_webhook",
                    webhook,
                )
            })?;
        }
        self.processing_config.validate()
    }
}

/// Final result of one workflow run, produced exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutput {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub workflow_id: String,
    pub dataset_id: String,
    pub status: WorkflowStatus,
    pub total_batches: usize,
    pub successful_batches: usize,
    pub failed_batches: usize,
    pub total_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    pub processing_time_seconds: f64,
    pub batch_results: Vec<BatchProcessingResult>,
    pub summary_statistics: Option<ValidationStatistics>,
    pub error_summary: Option<String>,
    /// Outcome of the optional post-processing stage, when it ran
    pub post_processing_status: Option<PostProcessingStatus>,
    /// Record of the artifact cleanup that follows post-processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_result: Option<CleanupResult>,
}

impl WorkflowOutput {
    /// Success-path output; a batch counts as successful only if all its items are
    pub fn completed(
        workflow_id: impl Into<String>,
        input: &WorkflowInput,
        batch_results: Vec<BatchProcessingResult>,
        statistics: ValidationStatistics,
        processing_time_seconds: f64,
    ) -> Self {
        let successful_batches = batch_results
            .iter()
            .filter(|r| r.is_fully_successful())
            .count();
        let successful_items = batch_results.iter().map(|r| r.successful_items()).sum();
        let failed_items = batch_results.iter().map(|r| r.failed_items()).sum();

        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            workflow_id: workflow_id.into(),
            dataset_id: input.dataset_id.clone(),
            status: WorkflowStatus::Completed,
            total_batches: input.batches.len(),
            successful_batches,
            failed_batches: batch_results.len() - successful_batches,
            total_items: input.total_items(),
            successful_items,
            failed_items,
            processing_time_seconds,
            batch_results,
            summary_statistics: Some(statistics),
            error_summary: None,
            post_processing_status: None,
            cleanup_result: None,
        }
    }

    /// Failure-path output: every batch and item is reported as failed
    pub fn failed(
        workflow_id: impl Into<String>,
        input: &WorkflowInput,
        status: WorkflowStatus,
        error_summary: impl Into<String>,
        processing_time_seconds: f64,
    ) -> Self {
        let total_items = input.total_items();
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            workflow_id: workflow_id.into(),
            dataset_id: input.dataset_id.clone(),
            status,
            total_batches: input.batches.len(),
            successful_batches: 0,
            failed_batches: input.batches.len(),
            total_items,
            successful_items: 0,
            failed_items: total_items,
            processing_time_seconds,
            batch_results: Vec::new(),
            summary_statistics: None,
            error_summary: Some(error_summary.into()),
            post_processing_status: None,
            cleanup_result: None,
        }
    }

    pub fn with_post_processing_status(mut self, status: PostProcessingStatus) -> Self {
        self.post_processing_status = Some(status);
        self
    }

    pub fn with_cleanup_result(mut self, cleanup: CleanupResult) -> Self {
        self.cleanup_result = Some(cleanup);
        self
    }
}
