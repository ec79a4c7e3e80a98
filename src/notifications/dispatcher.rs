//! # Notification Dispatcher
//!
//! Single entry point for the orchestrator's side effects: webhook
//! notifications, email, audit records and metric updates.

use super::sinks::{
    AuditSink, EmailSink, MetricsSink, TracingAuditSink, TracingEmailSink, TracingMetricsSink,
};
use super::webhook::WebhookClient;
use crate::config::BatchflowConfig;
use crate::constants::system;
use crate::error::{BatchflowError, Result};
use crate::execution::RetryPolicy;
use crate::models::{
    AuditRecord, DeliveryResult, EmailDeliveryResult, EmailNotification, MetricUpdate,
    NotificationEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct NotificationDispatcher {
    webhook: WebhookClient,
    delivery_policy: RetryPolicy,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<dyn MetricsSink>,
    email: Arc<dyn EmailSink>,
    email_send_delay: Duration,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("delivery_policy", &self.delivery_policy)
            .field("email_send_delay", &self.email_send_delay)
            .finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    pub fn new(webhook: WebhookClient, delivery_policy: RetryPolicy) -> Self {
        Self {
            webhook,
            delivery_policy,
            audit: Arc::new(TracingAuditSink),
            metrics: Arc::new(TracingMetricsSink),
            email: Arc::new(TracingEmailSink),
            email_send_delay: system::EMAIL_BASE_SEND_DELAY,
        }
    }

    pub fn from_config(config: &BatchflowConfig) -> Result<Self> {
        let webhook = WebhookClient::new(&config.notifications, &config.security)?;
        Ok(Self::new(webhook, config.notifications.delivery_policy()))
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_metrics_sink(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_email_sink(mut self, email: Arc<dyn EmailSink>) -> Self {
        self.email = email;
        self
    }

    /// Base send delay, before the priority factor
    pub fn with_email_send_delay(mut self, delay: Duration) -> Self {
        self.email_send_delay = delay;
        self
    }

    pub fn with_delivery_policy(mut self, delivery_policy: RetryPolicy) -> Self {
        self.delivery_policy = delivery_policy;
        self
    }

    pub fn delivery_policy(&self) -> &RetryPolicy {
        &self.delivery_policy
    }

    /// Deliver with the event's own policy, or the dispatcher default
    pub async fn deliver(&self, event: &NotificationEvent) -> DeliveryResult {
        let policy = event.retry_policy.as_ref().unwrap_or(&self.delivery_policy);
        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            workflow_id = %event.source_workflow_id,
            priority = %event.priority,
            "📨 Sending notification"
        );
        self.webhook.deliver(event, policy).await
    }

    /// As [`deliver`](Self::deliver), with failures surfaced as errors
    pub async fn send_notification(&self, event: &NotificationEvent) -> Result<DeliveryResult> {
        self.deliver(event).await.into_result()
    }

    /// Validate, wait out the priority-scaled send delay, then hand off to the sink.
    /// Failures come back as a `failed` result rather than an error.
    pub async fn send_email_notification(&self, email: &EmailNotification) -> EmailDeliveryResult {
        let started = Instant::now();
        info!(
            recipient = %email.recipient,
            subject = %email.subject,
            content_type = %email.content_type,
            priority = %email.priority,
            "✉️ Sending email notification"
        );

        let outcome = match email.validate() {
            Ok(()) => {
                tokio::time::sleep(email.send_delay(self.email_send_delay)).await;
                self.email.send(email).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(receipt) => {
                info!(
                    recipient = %email.recipient,
                    message_id = %receipt.message_id,
                    delivery_time_ms = started.elapsed().as_millis() as u64,
                    "Email notification sent"
                );
                EmailDeliveryResult::sent(email, receipt, started.elapsed())
            }
            Err(e) => {
                error!(
                    recipient = %email.recipient,
                    subject = %email.subject,
                    error = %e,
                    error_code = %e.code(),
                    "Email notification failed"
                );
                EmailDeliveryResult::failed(email, &e, started.elapsed())
            }
        }
    }

    pub async fn log_audit_event(&self, record: &AuditRecord) -> Result<()> {
        self.audit.record(record).await.map_err(|e| {
            error!(
                audit_id = %record.id,
                event_type = %record.event_type,
                error = %e,
                "Failed to write audit record"
            );
            match e {
                BatchflowError::AuditLoggingError { .. } => e,
                other => BatchflowError::AuditLoggingError {
                    message: other.to_string(),
                    activity_id: record.id.to_string(),
                },
            }
        })
    }

    /// Metrics are best effort; a failed publish is logged, not raised
    pub async fn update_metrics(&self, metrics: Vec<MetricUpdate>) -> Result<()> {
        if let Err(e) = self.metrics.publish(&metrics).await {
            warn!(count = metrics.len(), error = %e, "Failed to publish metrics");
        }
        Ok(())
    }
}
