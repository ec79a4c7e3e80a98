//! Work-unit counted operations and their progress snapshots.

use crate::constants::ActivityStatus;
use crate::error::{BatchflowError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongRunningOperationInput {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub operation_type: String,
    pub total_work_units: u64,
    #[serde(default = "default_work_unit_size")]
    pub work_unit_size: u64,
    #[serde(default = "default_true")]
    pub enable_heartbeat: bool,
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,
    #[serde(default = "default_true")]
    pub enable_progress_updates: bool,
    #[serde(default = "default_progress_update_interval_seconds")]
    pub progress_update_interval_seconds: u64,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

fn default_work_unit_size() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval_seconds() -> u64 {
    10
}

fn default_progress_update_interval_seconds() -> u64 {
    5
}

impl LongRunningOperationInput {
    pub fn new(operation_type: impl Into<String>, total_work_units: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation_type: operation_type.into(),
            total_work_units,
            work_unit_size: default_work_unit_size(),
            enable_heartbeat: true,
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
            enable_progress_updates: true,
            progress_update_interval_seconds: default_progress_update_interval_seconds(),
            parameters: HashMap::new(),
        }
    }

    pub fn with_work_unit_size(mut self, work_unit_size: u64) -> Self {
        self.work_unit_size = work_unit_size;
        self
    }

    pub fn with_intervals(mut self, heartbeat_seconds: u64, progress_seconds: u64) -> Self {
        self.heartbeat_interval_seconds = heartbeat_seconds;
        self.progress_update_interval_seconds = progress_seconds;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn progress_update_interval(&self) -> Duration {
        Duration::from_secs(self.progress_update_interval_seconds)
    }

    /// Cost multiplier for simulated work, read from the `complexity_factor` parameter
    pub fn complexity_factor(&self) -> f64 {
        self.parameters
            .get("complexity_factor")
            .and_then(serde_json::Value::as_f64)
            .filter(|factor| *factor >= 0.0)
            .unwrap_or(1.0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.operation_type.trim().is_empty() {
            return Err(BatchflowError::validation(
                "operation_type cannot be empty",
                "operation_type",
            ));
        }
        if self.total_work_units == 0 {
            return Err(BatchflowError::validation_value(
                "total_work_units must be positive",
                "total_work_units",
                self.total_work_units,
            ));
        }
        if self.work_unit_size == 0 {
            return Err(BatchflowError::validation_value(
                "work_unit_size must be positive",
                "work_unit_size",
                self.work_unit_size,
            ));
        }
        if self.heartbeat_interval_seconds == 0 || self.progress_update_interval_seconds == 0 {
            return Err(BatchflowError::validation(
                "heartbeat and progress intervals must be positive",
                "heartbeat_interval_seconds",
            ));
        }
        Ok(())
    }
}

/// Snapshot of a long-running operation's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub operation_id: Uuid,
    pub completed_work_units: u64,
    pub total_work_units: u64,
    pub progress_percentage: f64,
    /// Omitted while throughput is zero
    pub estimated_remaining_seconds: Option<f64>,
    pub current_stage: String,
    pub throughput_units_per_second: f64,
}

impl ProgressUpdate {
    pub fn new(
        operation_id: Uuid,
        completed_work_units: u64,
        total_work_units: u64,
        elapsed: Duration,
    ) -> Self {
        let progress_percentage = if total_work_units == 0 {
            0.0
        } else {
            completed_work_units as f64 / total_work_units as f64 * 100.0
        };

        let elapsed_seconds = elapsed.as_secs_f64();
        let throughput = if elapsed_seconds > 0.0 {
            completed_work_units as f64 / elapsed_seconds
        } else {
            0.0
        };

        let estimated_remaining_seconds = (throughput > 0.0).then(|| {
            total_work_units.saturating_sub(completed_work_units) as f64 / throughput
        });

        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            operation_id,
            completed_work_units,
            total_work_units,
            progress_percentage,
            estimated_remaining_seconds,
            current_stage: "processing".to_string(),
            throughput_units_per_second: throughput,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongRunningOperationOutput {
    pub operation_id: Uuid,
    pub operation_type: String,
    pub status: ActivityStatus,
    pub total_work_units: u64,
    pub completed_work_units: u64,
    pub failed_work_units: u64,
    pub execution_time_seconds: f64,
    pub average_throughput: f64,
    #[serde(default)]
    pub final_result: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub progress_history: Vec<ProgressUpdate>,
}

impl LongRunningOperationOutput {
    /// Some units completed and some failed; reported with status `completed`
    pub fn is_partial(&self) -> bool {
        self.status == ActivityStatus::Completed
            && self.completed_work_units > 0
            && self.failed_work_units > 0
    }
}

/// A cleanup task that did not finish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupFailure {
    pub task: String,
    pub error: String,
}

/// Record of the artifact cleanup that follows a long-running operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub operation_id: String,
    pub cleanup_time_seconds: f64,
    pub completed_tasks: Vec<String>,
    pub failed_tasks: Vec<CleanupFailure>,
    pub total_tasks: usize,
    pub success_rate: f64,
    /// Set when the cleanup as a whole could not run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CleanupResult {
    pub fn new(
        operation_id: impl Into<String>,
        completed_tasks: Vec<String>,
        failed_tasks: Vec<CleanupFailure>,
        elapsed: Duration,
    ) -> Self {
        let total_tasks = completed_tasks.len() + failed_tasks.len();
        let success_rate = if total_tasks == 0 {
            0.0
        } else {
            completed_tasks.len() as f64 / total_tasks as f64 * 100.0
        };
        Self {
            operation_id: operation_id.into(),
            cleanup_time_seconds: elapsed.as_secs_f64(),
            completed_tasks,
            failed_tasks,
            total_tasks,
            success_rate,
            error: None,
        }
    }

    /// Every task counts as failed with the same cause
    pub fn failed(operation_id: impl Into<String>, tasks: &[&str], error: &str, elapsed: Duration) -> Self {
        let failed_tasks = tasks
            .iter()
            .map(|task| CleanupFailure {
                task: task.to_string(),
                error: error.to_string(),
            })
            .collect();
        Self {
            error: Some(format!("Cleanup failed: {error}")),
            ..Self::new(operation_id, Vec::new(), failed_tasks, elapsed)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed_tasks.is_empty() && self.error.is_none()
    }
}
