//! Error types for the batch orchestration core.
//!
//! Every error carries a structured [`ErrorCode`], a human message and a map of
//! named context fields. The same values are used for propagation (`?`) and for
//! the side-channel log that records failures of detached, fire-and-forget work.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Structured error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "UNKNOWN_ERROR")]
    Unknown,
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "CONFIGURATION_ERROR")]
    Configuration,
    #[serde(rename = "DATA_PROCESSING_ERROR")]
    DataProcessing,
    #[serde(rename = "DATA_CORRUPTION_ERROR")]
    DataCorruption,
    #[serde(rename = "ACTIVITY_EXECUTION_ERROR")]
    ActivityExecution,
    #[serde(rename = "ACTIVITY_TIMEOUT_ERROR")]
    ActivityTimeout,
    #[serde(rename = "WORKFLOW_EXECUTION_ERROR")]
    WorkflowExecution,
    #[serde(rename = "WORKFLOW_CANCELLED_ERROR")]
    WorkflowCancelled,
    #[serde(rename = "STATE_TRANSITION_ERROR")]
    StateTransition,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimit,
    #[serde(rename = "INSUFFICIENT_RESOURCES_ERROR")]
    InsufficientResources,
    #[serde(rename = "AUDIT_LOGGING_ERROR")]
    AuditLogging,
    #[serde(rename = "NOTIFICATION_DELIVERY_ERROR")]
    NotificationDelivery,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::DataProcessing => "DATA_PROCESSING_ERROR",
            Self::DataCorruption => "DATA_CORRUPTION_ERROR",
            Self::ActivityExecution => "ACTIVITY_EXECUTION_ERROR",
            Self::ActivityTimeout => "ACTIVITY_TIMEOUT_ERROR",
            Self::WorkflowExecution => "WORKFLOW_EXECUTION_ERROR",
            Self::WorkflowCancelled => "WORKFLOW_CANCELLED_ERROR",
            Self::StateTransition => "STATE_TRANSITION_ERROR",
            Self::RateLimit => "RATE_LIMIT_ERROR",
            Self::InsufficientResources => "INSUFFICIENT_RESOURCES_ERROR",
            Self::AuditLogging => "AUDIT_LOGGING_ERROR",
            Self::NotificationDelivery => "NOTIFICATION_DELIVERY_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchflowError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
        value: Option<String>,
    },
    #[error("Configuration error: {message}")]
    ConfigurationError {
        message: String,
        config_key: Option<String>,
    },
    #[error("Data processing error: {message}")]
    DataProcessingError {
        message: String,
        data_type: Option<String>,
        record_count: Option<usize>,
    },
    #[error("Data corruption detected for item {item_id}: expected checksum {expected}, computed {actual}")]
    DataCorruptionError {
        item_id: String,
        expected: String,
        actual: String,
    },
    #[error("Activity execution error: {message}")]
    ActivityExecutionError {
        message: String,
        activity_type: Option<String>,
        attempt: Option<u32>,
    },
    #[error("Activity timeout for {activity_type}: {message}")]
    ActivityTimeoutError {
        message: String,
        activity_type: String,
        timeout: Option<Duration>,
    },
    #[error("Unit {unit} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        unit: String,
        attempts: u32,
        last_error: Box<BatchflowError>,
    },
    #[error("Workflow execution error: {message}")]
    WorkflowExecutionError {
        message: String,
        workflow_id: Option<String>,
    },
    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },
    #[error("Invalid state transition from {from} to {to}")]
    StateTransitionError { from: String, to: String },
    #[error("Rate limited after {attempts} attempts")]
    RateLimitError {
        attempts: u32,
        retry_after_seconds: Option<u64>,
    },
    #[error("Insufficient resources: {message}")]
    InsufficientResources {
        message: String,
        resource_type: Option<String>,
        required: Option<String>,
        available: Option<String>,
    },
    #[error("Audit logging failed for {activity_id}: {message}")]
    AuditLoggingError { message: String, activity_id: String },
    #[error("Notification delivery to {endpoint} failed: {message}")]
    NotificationDeliveryError { message: String, endpoint: String },
}

impl BatchflowError {
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
            value: None,
        }
    }

    pub fn validation_value(
        message: impl Into<String>,
        field: impl Into<String>,
        value: impl std::fmt::Display,
    ) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
            value: Some(value.to_string()),
        }
    }

    pub fn configuration(message: impl Into<String>, config_key: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            config_key: Some(config_key.into()),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::DataProcessingError {
            message: message.into(),
            data_type: None,
            record_count: None,
        }
    }

    pub fn activity(message: impl Into<String>, activity_type: impl Into<String>) -> Self {
        Self::ActivityExecutionError {
            message: message.into(),
            activity_type: Some(activity_type.into()),
            attempt: None,
        }
    }

    pub fn timeout(
        message: impl Into<String>,
        activity_type: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self::ActivityTimeoutError {
            message: message.into(),
            activity_type: activity_type.into(),
            timeout: Some(timeout),
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn insufficient_resources(
        message: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        Self::InsufficientResources {
            message: message.into(),
            resource_type: Some(resource_type.into()),
            required: None,
            available: None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ValidationError { .. } => ErrorCode::Validation,
            Self::ConfigurationError { .. } => ErrorCode::Configuration,
            Self::DataProcessingError { .. } => ErrorCode::DataProcessing,
            Self::DataCorruptionError { .. } => ErrorCode::DataCorruption,
            Self::ActivityExecutionError { .. } | Self::RetriesExhausted { .. } => {
                ErrorCode::ActivityExecution
            }
            Self::ActivityTimeoutError { .. } => ErrorCode::ActivityTimeout,
            Self::WorkflowExecutionError { .. } => ErrorCode::WorkflowExecution,
            Self::Cancelled { .. } => ErrorCode::WorkflowCancelled,
            Self::StateTransitionError { .. } => ErrorCode::StateTransition,
            Self::RateLimitError { .. } => ErrorCode::RateLimit,
            Self::InsufficientResources { .. } => ErrorCode::InsufficientResources,
            Self::AuditLoggingError { .. } => ErrorCode::AuditLogging,
            Self::NotificationDeliveryError { .. } => ErrorCode::NotificationDelivery,
        }
    }

    /// Whether a supervising retry policy should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DataProcessingError { .. }
                | Self::ActivityExecutionError { .. }
                | Self::ActivityTimeoutError { .. }
                | Self::InsufficientResources { .. }
                | Self::NotificationDeliveryError { .. }
                | Self::AuditLoggingError { .. }
        )
    }

    /// Errors caused by the data itself; retrying the same input cannot succeed.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::ValidationError { .. } | Self::DataCorruptionError { .. }
        )
    }

    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::RetriesExhausted { last_error, .. } => last_error.is_cancellation(),
            _ => false,
        }
    }

    /// Named context fields carried by this error
    pub fn context(&self) -> HashMap<String, serde_json::Value> {
        let mut context = HashMap::new();
        let mut put = |key: &str, value: serde_json::Value| {
            context.insert(key.to_string(), value);
        };

        match self {
            Self::ValidationError { field, value, .. } => {
                if let Some(field) = field {
                    put("field", field.clone().into());
                }
                if let Some(value) = value {
                    put("value", value.clone().into());
                }
            }
            Self::ConfigurationError { config_key, .. } => {
                if let Some(key) = config_key {
                    put("config_key", key.clone().into());
                }
            }
            Self::DataProcessingError {
                data_type,
                record_count,
                ..
            } => {
                if let Some(data_type) = data_type {
                    put("data_type", data_type.clone().into());
                }
                if let Some(count) = record_count {
                    put("record_count", (*count).into());
                }
            }
            Self::DataCorruptionError {
                item_id,
                expected,
                actual,
            } => {
                put("item_id", item_id.clone().into());
                put("expected_checksum", expected.clone().into());
                put("actual_checksum", actual.clone().into());
            }
            Self::ActivityExecutionError {
                activity_type,
                attempt,
                ..
            } => {
                if let Some(activity_type) = activity_type {
                    put("activity_type", activity_type.clone().into());
                }
                if let Some(attempt) = attempt {
                    put("attempt", (*attempt).into());
                }
            }
            Self::ActivityTimeoutError {
                activity_type,
                timeout,
                ..
            } => {
                put("activity_type", activity_type.clone().into());
                if let Some(timeout) = timeout {
                    put("timeout_seconds", timeout.as_secs_f64().into());
                }
            }
            Self::RetriesExhausted {
                unit,
                attempts,
                last_error,
            } => {
                put("unit", unit.clone().into());
                put("attempts", (*attempts).into());
                put("last_error_code", last_error.code().as_str().into());
            }
            Self::WorkflowExecutionError { workflow_id, .. } => {
                if let Some(id) = workflow_id {
                    put("workflow_id", id.clone().into());
                }
            }
            Self::Cancelled { operation } => put("operation", operation.clone().into()),
            Self::StateTransitionError { from, to } => {
                put("from", from.clone().into());
                put("to", to.clone().into());
            }
            Self::RateLimitError {
                attempts,
                retry_after_seconds,
            } => {
                put("attempts", (*attempts).into());
                if let Some(retry_after) = retry_after_seconds {
                    put("retry_after_seconds", (*retry_after).into());
                }
            }
            Self::InsufficientResources {
                resource_type,
                required,
                available,
                ..
            } => {
                if let Some(resource_type) = resource_type {
                    put("resource_type", resource_type.clone().into());
                }
                if let Some(required) = required {
                    put("required", required.clone().into());
                }
                if let Some(available) = available {
                    put("available", available.clone().into());
                }
            }
            Self::AuditLoggingError { activity_id, .. } => {
                put("activity_type", "log_audit_event".into());
                put("activity_id", activity_id.clone().into());
            }
            Self::NotificationDeliveryError { endpoint, .. } => {
                put("endpoint", endpoint.clone().into());
            }
        }

        context
    }

    pub fn to_details(&self) -> ErrorDetails {
        ErrorDetails {
            error_code: self.code(),
            message: self.to_string(),
            context: self.context(),
        }
    }
}

/// Serializable snapshot of an error, used for logging and side-channel records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub error_code: ErrorCode,
    pub message: String,
    pub context: HashMap<String, serde_json::Value>,
}

impl From<serde_json::Error> for BatchflowError {
    fn from(error: serde_json::Error) -> Self {
        BatchflowError::ValidationError {
            message: format!("JSON serialization error: {error}"),
            field: None,
            value: None,
        }
    }
}

impl From<config::ConfigError> for BatchflowError {
    fn from(error: config::ConfigError) -> Self {
        BatchflowError::ConfigurationError {
            message: error.to_string(),
            config_key: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BatchflowError>;
