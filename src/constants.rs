//! # System Constants
//!
//! Status, mode and priority enums shared by every component, plus the fixed
//! operational limits of the batch orchestration core.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed operational limits
pub mod system {
    use std::time::Duration;

    pub const SOURCE: &str = "batchflow";
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Simulated item throughput used to derive per-item processing time
    pub const SIMULATED_BYTES_PER_SECOND: f64 = 10_000.0;
    pub const MAX_ITEM_PROCESSING_TIME: Duration = Duration::from_secs(10);

    /// Upper bound on work units executed in one long-running batch
    pub const LONG_RUNNING_UNIT_CAP: u64 = 1000;

    pub const PARALLEL_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

    pub const AUDIT_RETENTION_DAYS: u32 = 2555;

    /// Maximum number of response-body bytes kept in a delivery result
    pub const MAX_CAPTURED_BODY_BYTES: usize = 1000;

    /// Oldest detached-task failures are rotated out past this many
    pub const MAX_DETACHED_FAILURES: usize = 1000;

    /// Email send delay before the priority factor is applied
    pub const EMAIL_BASE_SEND_DELAY: Duration = Duration::from_millis(500);
    /// Bodies above this size take half again as long to send
    pub const LARGE_EMAIL_BYTES: usize = 10_000;

    pub const CLEANUP_TASKS: [&str; 5] = [
        "Remove temporary files",
        "Clear cache entries",
        "Release memory buffers",
        "Close database connections",
        "Update processing logs",
    ];
}

/// Metric names emitted by the orchestrator
pub mod metrics {
    pub const WORKFLOW_COMPLETED_TOTAL: &str = "workflow_completed_total";
    pub const ITEMS_PROCESSED_TOTAL: &str = "items_processed_total";
    pub const ITEMS_SUCCESSFUL_TOTAL: &str = "items_successful_total";
    pub const ITEMS_FAILED_TOTAL: &str = "items_failed_total";
    pub const PROCESSING_TIME_SECONDS: &str = "processing_time_seconds";
    pub const SUCCESS_RATE_PERCENTAGE: &str = "success_rate_percentage";
    pub const BATCH_PROCESSING_PROGRESS: &str = "batch_processing_progress";
}

/// Notification event types
pub mod events {
    pub const WORKFLOW_STARTED: &str = "workflow_started";
    pub const WORKFLOW_COMPLETED: &str = "workflow_completed";
    pub const WORKFLOW_FAILED: &str = "workflow_failed";
}

/// Status of a single unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retrying,
    Timeout,
}

impl ActivityStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Retrying => write!(f, "retrying"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

impl std::str::FromStr for ActivityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            "timeout" => Ok(Self::Timeout),
            _ => Err(format!("Invalid activity status: {s}")),
        }
    }
}

/// Terminal and in-flight status of a workflow or long-running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timeout" => Ok(Self::Timeout),
            _ => Err(format!("Invalid workflow status: {s}")),
        }
    }
}

/// Outcome of the optional post-processing stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostProcessingStatus {
    Completed,
    /// Some work units failed and the rest completed
    PartiallyCompleted,
    Failed,
}

impl fmt::Display for PostProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::PartiallyCompleted => write!(f, "partially_completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for PostProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "partially_completed" => Ok(Self::PartiallyCompleted),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid post-processing status: {s}")),
        }
    }
}

/// How the items of a batch are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    Sequential,
    #[default]
    Parallel,
    Batch,
}

impl ProcessingMode {
    pub fn is_sequential(&self) -> bool {
        matches!(self, Self::Sequential)
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Batch => write!(f, "batch"),
        }
    }
}

impl std::str::FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "batch" => Ok(Self::Batch),
            _ => Err(format!("Invalid processing mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid priority: {s}")),
        }
    }
}
