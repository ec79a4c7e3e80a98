//! Builders and fault-injecting collaborators shared by the integration tests.

use async_trait::async_trait;
use batchflow_core::config::{
    BatchflowConfig, NotificationSettings, SecuritySettings, WorkflowSettings,
};
use batchflow_core::constants::{Priority, ProcessingMode};
use batchflow_core::error::{BatchflowError, Result};
use batchflow_core::execution::{ExecutionContext, RetryPolicy};
use batchflow_core::models::{DataBatch, DataItem, LongRunningOperationInput};
use batchflow_core::notifications::{
    InMemoryAuditSink, InMemoryMetricsSink, NotificationDispatcher, WebhookClient,
};
use batchflow_core::processing::{ItemTransform, WorkUnitRunner};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use wiremock::{Request, Respond, ResponseTemplate};

/// Batch of `n` small text items: "row 1", "row 2", ...
pub fn text_batch(n: usize, mode: ProcessingMode) -> DataBatch {
    let items = (1..=n)
        .map(|i| DataItem::from_text(format!("row {i}")).unwrap())
        .collect();
    DataBatch::from_items(items, mode, Priority::Medium).unwrap()
}

pub fn text_batches(batches: usize, items: usize, mode: ProcessingMode) -> Vec<DataBatch> {
    (0..batches).map(|_| text_batch(items, mode)).collect()
}

/// Workflow settings with millisecond retry delays
pub fn fast_workflow_settings() -> WorkflowSettings {
    WorkflowSettings {
        activity_max_attempts: 2,
        retry_initial_interval_seconds: 0.01,
        retry_max_interval_seconds: 0.05,
        ..WorkflowSettings::default()
    }
}

pub fn fast_config() -> BatchflowConfig {
    BatchflowConfig {
        environment: "test".to_string(),
        workflow: fast_workflow_settings(),
        notifications: fast_notification_settings(),
        ..BatchflowConfig::default()
    }
}

pub fn fast_notification_settings() -> NotificationSettings {
    NotificationSettings {
        http_timeout_seconds: 5,
        max_attempts: 3,
        initial_delay_seconds: 0.05,
        max_delay_seconds: 0.2,
        backoff_multiplier: 2.0,
        ..NotificationSettings::default()
    }
}

/// Delivery policy with short delays for tests that exercise retries
pub fn fast_delivery_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        Duration::from_millis(50),
        Duration::from_secs(5),
        2.0,
        max_attempts,
    )
}

/// Dispatcher wired to in-memory sinks so tests can inspect side effects
pub struct TestDispatcher {
    pub dispatcher: NotificationDispatcher,
    pub audit: InMemoryAuditSink,
    pub metrics: InMemoryMetricsSink,
}

pub fn test_dispatcher(policy: RetryPolicy) -> TestDispatcher {
    test_dispatcher_with_security(policy, &SecuritySettings::default())
}

pub fn test_dispatcher_with_security(
    policy: RetryPolicy,
    security: &SecuritySettings,
) -> TestDispatcher {
    let audit = InMemoryAuditSink::new();
    let metrics = InMemoryMetricsSink::new();
    let webhook = WebhookClient::new(&fast_notification_settings(), security).unwrap();
    let dispatcher = NotificationDispatcher::new(webhook, policy)
        .with_audit_sink(Arc::new(audit.clone()))
        .with_metrics_sink(Arc::new(metrics.clone()));

    TestDispatcher {
        dispatcher,
        audit,
        metrics,
    }
}

/// Uppercases content, but raises an unexpected processing fault for one exact value
#[derive(Debug, Clone)]
pub struct FaultOnContent {
    pub content: String,
}

impl FaultOnContent {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[async_trait]
impl ItemTransform for FaultOnContent {
    fn method(&self) -> &str {
        "fault_injecting_transform"
    }

    async fn transform(&self, item: &DataItem) -> Result<String> {
        if item.content() == self.content {
            return Err(BatchflowError::processing(format!(
                "injected fault for '{}'",
                self.content
            )));
        }
        Ok(item.content().to_uppercase())
    }
}

/// Work runner that completes instantly except for the listed zero-based batches
#[derive(Debug, Default)]
pub struct FailingBatchesRunner {
    failing: HashSet<u64>,
    calls: AtomicU64,
}

impl FailingBatchesRunner {
    pub fn new(failing: impl IntoIterator<Item = u64>) -> Self {
        Self {
            failing: failing.into_iter().collect(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkUnitRunner for FailingBatchesRunner {
    async fn run_batch(
        &self,
        _operation: &LongRunningOperationInput,
        batch_index: u64,
        _units: u64,
        ctx: &dyn ExecutionContext,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ctx.heartbeat(&format!("batch {batch_index}"));
        if self.failing.contains(&batch_index) {
            return Err(BatchflowError::processing(format!(
                "work batch {batch_index} failed"
            )));
        }
        Ok(())
    }
}

/// Responds with a fixed template and records when each request arrived
#[derive(Clone)]
pub struct TimestampedResponder {
    template: ResponseTemplate,
    arrivals: Arc<Mutex<Vec<Instant>>>,
}

impl TimestampedResponder {
    pub fn new(template: ResponseTemplate) -> Self {
        Self {
            template,
            arrivals: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Time between consecutive requests
    pub fn gaps(&self) -> Vec<Duration> {
        self.arrivals
            .lock()
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }
}

impl Respond for TimestampedResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.arrivals.lock().push(Instant::now());
        self.template.clone()
    }
}

/// Work runner whose first batch blocks until its unit is cancelled
#[derive(Debug, Default)]
pub struct BlockUntilCancelledRunner {
    started: Notify,
    token: Mutex<Option<CancellationToken>>,
}

impl BlockUntilCancelledRunner {
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Token the blocked batch was handed, once it started
    pub fn token(&self) -> Option<CancellationToken> {
        self.token.lock().clone()
    }
}

#[async_trait]
impl WorkUnitRunner for BlockUntilCancelledRunner {
    async fn run_batch(
        &self,
        operation: &LongRunningOperationInput,
        _batch_index: u64,
        _units: u64,
        ctx: &dyn ExecutionContext,
    ) -> Result<()> {
        let token = ctx.cancellation();
        *self.token.lock() = Some(token.clone());
        self.started.notify_one();
        token.cancelled().await;
        Err(BatchflowError::cancelled(operation.operation_type.clone()))
    }
}
