//! # Data Models
//!
//! Value records exchanged between the orchestrator, the batch executor, the
//! long-running processor and the notification dispatcher. Records are
//! validated at construction and treated as immutable afterwards.

pub mod data;
pub mod long_running;
pub mod notification;
pub mod results;
pub mod validation;
pub mod workflow;

pub use data::{DataBatch, DataItem};
pub use long_running::{
    CleanupFailure, CleanupResult, LongRunningOperationInput, LongRunningOperationOutput,
    ProgressUpdate,
};
pub use notification::{
    AuditRecord, DeliveryResult, DeliveryStatus, EmailDeliveryResult, EmailDeliveryStatus,
    EmailNotification, EmailReceipt, MetricUpdate, NotificationEvent,
};
pub use results::{BatchProcessingResult, ProcessingResult};
pub use validation::{ValidationReport, ValidationStatistics};
pub use workflow::{ProcessingConfig, WorkflowInput, WorkflowOutput};
