//! Audit, metrics and email destinations.
//!
//! The tracing sinks write structured log events and are the defaults. The
//! in-memory sinks keep everything they receive and can be switched into a
//! failing mode, which the test suites use to observe side effects.

use crate::error::{BatchflowError, Result};
use crate::models::{AuditRecord, EmailNotification, EmailReceipt, MetricUpdate};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<()>;
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn publish(&self, metrics: &[MetricUpdate]) -> Result<()>;
}

/// Transport for outgoing email
#[async_trait]
pub trait EmailSink: Send + Sync {
    async fn send(&self, email: &EmailNotification) -> Result<EmailReceipt>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        let metadata = serde_json::to_string(&record.metadata)?;
        info!(
            target: "batchflow::audit",
            audit_id = %record.id,
            event_type = %record.event_type,
            user_id = %record.user_id,
            resource_id = %record.resource_id,
            action = %record.action,
            retention_days = record.retention_days,
            metadata = %metadata,
            "🧾 AUDIT"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsSink;

#[async_trait]
impl MetricsSink for TracingMetricsSink {
    async fn publish(&self, metrics: &[MetricUpdate]) -> Result<()> {
        for metric in metrics {
            info!(
                target: "batchflow::metrics",
                metric = %metric.name,
                value = metric.value,
                labels = ?metric.labels,
                "📊 METRIC"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every record from now on
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BatchflowError::AuditLoggingError {
                message: "audit store unavailable".to_string(),
                activity_id: record.id.to_string(),
            });
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryMetricsSink {
    metrics: Arc<Mutex<Vec<MetricUpdate>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn metrics(&self) -> Vec<MetricUpdate> {
        self.metrics.lock().clone()
    }

    pub fn named(&self, name: &str) -> Vec<MetricUpdate> {
        self.metrics
            .lock()
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsSink {
    async fn publish(&self, metrics: &[MetricUpdate]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BatchflowError::processing("metrics backend unavailable"));
        }
        self.metrics.lock().extend_from_slice(metrics);
        Ok(())
    }
}

/// Accepts every message and logs it
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEmailSink;

#[async_trait]
impl EmailSink for TracingEmailSink {
    async fn send(&self, email: &EmailNotification) -> Result<EmailReceipt> {
        let message_id = format!("msg_{}", Uuid::new_v4().simple());
        info!(
            target: "batchflow::email",
            message_id = %message_id,
            recipient = %email.recipient,
            subject = %email.subject,
            content_type = %email.content_type,
            priority = %email.priority,
            content_size_bytes = email.content_size_bytes(),
            "✉️ EMAIL"
        );
        Ok(EmailReceipt {
            message_id,
            smtp_response: "250 2.0.0 Message accepted for delivery".to_string(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryEmailSink {
    sent: Arc<Mutex<Vec<EmailNotification>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryEmailSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<EmailNotification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl EmailSink for InMemoryEmailSink {
    async fn send(&self, email: &EmailNotification) -> Result<EmailReceipt> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BatchflowError::NotificationDeliveryError {
                message: "email service temporarily unavailable".to_string(),
                endpoint: format!("mailto:{}", email.recipient),
            });
        }
        let mut sent = self.sent.lock();
        sent.push(email.clone());
        Ok(EmailReceipt {
            message_id: format!("msg_{}", sent.len()),
            smtp_response: "250 OK".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_in_memory_audit_sink() {
        let sink = InMemoryAuditSink::new();
        let record = AuditRecord::new("workflow_started", "system", "ds-1", "run", HashMap::new());
        sink.record(&record).await.unwrap();
        assert_eq!(sink.records().len(), 1);

        sink.set_failing(true);
        let error = sink.record(&record).await.unwrap_err();
        assert!(matches!(error, BatchflowError::AuditLoggingError { .. }));
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_filtering() {
        let sink = InMemoryMetricsSink::new();
        sink.publish(&[MetricUpdate::new("a", 1.0), MetricUpdate::new("b", 2.0)])
            .await
            .unwrap();
        assert_eq!(sink.named("b")[0].value, 2.0);
        assert!(TracingMetricsSink.publish(&sink.metrics()).await.is_ok());
    }

    #[tokio::test]
    async fn test_in_memory_email_sink() {
        let sink = InMemoryEmailSink::new();
        let email = EmailNotification::new("ops@example.com", "done", "all good");
        assert_eq!(sink.send(&email).await.unwrap().message_id, "msg_1");

        sink.set_failing(true);
        let error = sink.send(&email).await.unwrap_err();
        assert!(matches!(error, BatchflowError::NotificationDeliveryError { .. }));
        assert_eq!(sink.sent().len(), 1);

        let receipt = TracingEmailSink.send(&email).await.unwrap();
        assert!(receipt.message_id.starts_with("msg_"));
        assert!(receipt.smtp_response.starts_with("250"));
    }
}
