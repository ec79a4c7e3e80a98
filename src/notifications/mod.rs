//! # Notifications
//!
//! Webhook delivery with retry and server-requested backoff, plus the audit,
//! metrics and email sinks the orchestrator reports to.

pub mod backoff;
pub mod dispatcher;
pub mod sinks;
pub mod webhook;

pub use backoff::{extract_retry_after, BackoffType, ResponseClass};
pub use dispatcher::NotificationDispatcher;
pub use sinks::{
    AuditSink, EmailSink, InMemoryAuditSink, InMemoryEmailSink, InMemoryMetricsSink, MetricsSink,
    TracingAuditSink, TracingEmailSink, TracingMetricsSink,
};
pub use webhook::WebhookClient;
