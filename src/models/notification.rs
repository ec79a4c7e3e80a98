//! Fire-and-forget side-effect records: webhook events, audit entries and metrics.

use crate::constants::{system, Priority};
use crate::error::{BatchflowError, Result};
use crate::execution::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub event_type: String,
    pub source_workflow_id: String,
    pub event_data: HashMap<String, serde_json::Value>,
    pub priority: Priority,
    pub delivery_method: String,
    pub target_endpoint: String,
    /// Overrides the dispatcher's default delivery policy
    pub retry_policy: Option<RetryPolicy>,
}

impl NotificationEvent {
    pub fn new(
        event_type: impl Into<String>,
        source_workflow_id: impl Into<String>,
        target_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            event_type: event_type.into(),
            source_workflow_id: source_workflow_id.into(),
            event_data: HashMap::new(),
            priority: Priority::Medium,
            delivery_method: "webhook".to_string(),
            target_endpoint: target_endpoint.into(),
            retry_policy: None,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.event_data.insert(key.into(), value);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    /// JSON body posted to the webhook endpoint
    pub fn webhook_body(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "event_type": self.event_type,
            "source_workflow_id": self.source_workflow_id,
            "timestamp": self.created_at.to_rfc3339(),
            "priority": self.priority,
            "data": self.event_data,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    /// 4xx other than 429; not retried
    Rejected,
    /// 429 on every attempt
    RateLimited,
    /// 5xx or network faults on every attempt
    Failed,
}

/// Captured outcome of one webhook delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub event_id: Uuid,
    pub endpoint: String,
    pub status: DeliveryStatus,
    pub success: bool,
    pub attempts: u32,
    pub status_code: Option<u16>,
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub delivery_time_seconds: f64,
}

/// An email handed to the configured email sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailNotification {
    pub recipient: String,
    pub subject: String,
    pub content: String,
    #[serde(default = "default_email_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub priority: Priority,
}

fn default_email_content_type() -> String {
    "text/plain".to_string()
}

impl EmailNotification {
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            content: content.into(),
            content_type: default_email_content_type(),
            priority: Priority::Medium,
        }
    }

    pub fn with_html(mut self) -> Self {
        self.content_type = "text/html".to_string();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn content_size_bytes(&self) -> usize {
        self.content.len()
    }

    /// Needs a local part and a dotted domain
    pub fn validate(&self) -> Result<()> {
        let valid = self
            .recipient
            .rsplit_once('@')
            .is_some_and(|(local, domain)| {
                !local.trim().is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
            });
        if !valid {
            return Err(BatchflowError::validation_value(
                format!("Invalid email address: {}", self.recipient),
                "recipient",
                &self.recipient,
            ));
        }
        if !matches!(self.content_type.as_str(), "text/plain" | "text/html") {
            return Err(BatchflowError::validation_value(
                "content_type must be text/plain or text/html",
                "content_type",
                &self.content_type,
            ));
        }
        Ok(())
    }

    /// `base` scaled by priority; large bodies take half again as long
    pub fn send_delay(&self, base: Duration) -> Duration {
        // per mille
        let factor: u32 = match self.priority {
            Priority::Critical => 100,
            Priority::High => 300,
            Priority::Medium => 1000,
            Priority::Low => 2000,
        };
        let delay = base * factor / 1000;
        if self.content_size_bytes() > system::LARGE_EMAIL_BYTES {
            delay * 3 / 2
        } else {
            delay
        }
    }
}

/// What an email sink reports for an accepted message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailReceipt {
    pub message_id: String,
    pub smtp_response: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailDeliveryStatus {
    Sent,
    Failed,
}

/// Captured outcome of one email send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailDeliveryResult {
    pub recipient: String,
    pub subject: String,
    pub content_size_bytes: usize,
    pub content_type: String,
    pub priority: Priority,
    pub delivery_status: EmailDeliveryStatus,
    pub delivery_time_seconds: f64,
    pub message_id: Option<String>,
    pub smtp_response: Option<String>,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
}

impl EmailDeliveryResult {
    pub fn sent(email: &EmailNotification, receipt: EmailReceipt, elapsed: Duration) -> Self {
        Self {
            message_id: Some(receipt.message_id),
            smtp_response: Some(receipt.smtp_response),
            ..Self::base(email, EmailDeliveryStatus::Sent, elapsed)
        }
    }

    pub fn failed(email: &EmailNotification, error: &BatchflowError, elapsed: Duration) -> Self {
        Self {
            error_message: Some(format!("Email notification failed: {error}")),
            error_type: Some(error.code().to_string()),
            ..Self::base(email, EmailDeliveryStatus::Failed, elapsed)
        }
    }

    fn base(email: &EmailNotification, delivery_status: EmailDeliveryStatus, elapsed: Duration) -> Self {
        Self {
            recipient: email.recipient.clone(),
            subject: email.subject.clone(),
            content_size_bytes: email.content_size_bytes(),
            content_type: email.content_type.clone(),
            priority: email.priority,
            delivery_status,
            delivery_time_seconds: elapsed.as_secs_f64(),
            message_id: None,
            smtp_response: None,
            error_message: None,
            error_type: None,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.delivery_status == EmailDeliveryStatus::Sent
    }

    /// Failed sends surface as notification delivery errors
    pub fn into_result(self) -> Result<Self> {
        if self.is_sent() {
            return Ok(self);
        }
        Err(BatchflowError::NotificationDeliveryError {
            message: self
                .error_message
                .unwrap_or_else(|| "Email notification failed".to_string()),
            endpoint: format!("mailto:{}", self.recipient),
        })
    }
}

/// Structured audit-log entry with a fixed retention period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub user_id: String,
    pub resource_id: String,
    pub action: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub retention_days: u32,
    pub source: String,
    pub version: String,
}

impl AuditRecord {
    pub fn new(
        event_type: impl Into<String>,
        user_id: impl Into<String>,
        resource_id: impl Into<String>,
        action: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: event_type.into(),
            user_id: user_id.into(),
            resource_id: resource_id.into(),
            action: action.into(),
            metadata,
            retention_days: system::AUDIT_RETENTION_DAYS,
            source: system::SOURCE.to_string(),
            version: system::VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricUpdate {
    pub name: String,
    pub value: f64,
    pub labels: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl MetricUpdate {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            labels: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}
