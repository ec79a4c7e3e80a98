//! # Orchestrator
//!
//! Top-level workflow driver. One [`Orchestrator::run`] call takes a
//! [`WorkflowInput`] through the stages of [`OrchestratorState`]:
//!
//! 1. audit record (detached) and background resource monitoring
//! 2. batch execution, sequential or as a bounded fan-out of child units
//! 3. validation of the collected batch results
//! 4. optional long-running post-processing, followed by artifact cleanup
//! 5. completion notification and metrics (detached)
//!
//! A batch that exhausts its retries is recorded as a degraded result and
//! its siblings carry on. Any other error, the execution timeout included,
//! ends the run with a `failed` [`WorkflowOutput`] and a best-effort failure
//! notification. A cancelled run ends `cancelled` and notifies no one. `run`
//! always returns an output and never an error.
//!
//! Every run gets its own cancellation scope beneath the substrate's token,
//! so cancelling one run leaves concurrent and later runs untouched.

use super::batch_workflow::{degraded, BatchWorkflow};
use super::state::{OrchestratorState, WorkflowStateMachine};
use crate::config::{BatchflowConfig, WorkflowSettings};
use crate::constants::{events, metrics, system, PostProcessingStatus, Priority, WorkflowStatus};
use crate::error::{BatchflowError, Result};
use crate::execution::{BoundedPool, LocalSubstrate, RetryPolicy, Substrate, UnitHandle, UnitOptions};
use crate::logging::{log_error, log_workflow_operation};
use crate::models::{
    AuditRecord, BatchProcessingResult, CleanupResult, LongRunningOperationInput, MetricUpdate,
    NotificationEvent, ValidationReport, ValidationStatistics, WorkflowInput, WorkflowOutput,
};
use crate::notifications::NotificationDispatcher;
use crate::processing::{
    monitor_system_resources, ArtifactCleanup, BatchExecutor, ItemProcessor, LongRunningProcessor,
    ResourceSnapshot, ResultValidator,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

const MONITOR_TIMEOUT: Duration = Duration::from_secs(60);
const MONITOR_JOIN_WAIT: Duration = Duration::from_secs(5);
const POST_PROCESSING_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);
const POST_PROCESSING_HEARTBEAT: Duration = Duration::from_secs(30);
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
pub struct Orchestrator<S = LocalSubstrate> {
    substrate: S,
    settings: WorkflowSettings,
    executor: Arc<BatchExecutor>,
    validator: ResultValidator,
    long_running: Arc<LongRunningProcessor>,
    cleanup: Arc<ArtifactCleanup>,
    dispatcher: NotificationDispatcher,
    /// Parent of every in-flight run's scope; replaced on [`Orchestrator::cancel`]
    runs: Mutex<CancellationToken>,
}

impl Orchestrator<LocalSubstrate> {
    /// Orchestrator on a fresh in-process substrate
    pub fn local(config: &BatchflowConfig) -> Result<Self> {
        Self::new(LocalSubstrate::new(), config)
    }
}

impl<S: Substrate + Clone> Orchestrator<S> {
    pub fn new(substrate: S, config: &BatchflowConfig) -> Result<Self> {
        config.validate()?;
        let executor = BatchExecutor::new(
            Arc::new(ItemProcessor::default()),
            config.workflow.max_concurrent_activities,
        );

        let runs = Mutex::new(substrate.cancellation().child_token());
        Ok(Self {
            substrate,
            settings: config.workflow.clone(),
            executor: Arc::new(executor),
            validator: ResultValidator::new(),
            long_running: Arc::new(LongRunningProcessor::default()),
            cleanup: Arc::new(ArtifactCleanup::default()),
            dispatcher: NotificationDispatcher::from_config(config)?,
            runs,
        })
    }

    pub fn with_item_processor(mut self, processor: Arc<ItemProcessor>) -> Self {
        self.executor = Arc::new(BatchExecutor::new(
            processor,
            self.settings.max_concurrent_activities,
        ));
        self
    }

    pub fn with_long_running_processor(mut self, processor: Arc<LongRunningProcessor>) -> Self {
        self.long_running = processor;
        self
    }

    pub fn with_artifact_cleanup(mut self, cleanup: Arc<ArtifactCleanup>) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: NotificationDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn substrate(&self) -> &S {
        &self.substrate
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Cancel the runs in flight right now. Runs started afterwards are unaffected.
    pub fn cancel(&self) {
        let mut runs = self.runs.lock();
        runs.cancel();
        *runs = self.substrate.cancellation().child_token();
    }

    pub async fn run(&self, input: WorkflowInput) -> WorkflowOutput {
        self.run_with_cancellation(input, CancellationToken::new()).await
    }

    /// As [`run`](Self::run); cancelling `cancel` stops this run only
    pub async fn run_with_cancellation(
        &self,
        input: WorkflowInput,
        cancel: CancellationToken,
    ) -> WorkflowOutput {
        let scope = self.runs.lock().child_token();
        let substrate = self.substrate.scoped(scope.clone());
        let _link = AbortOnDropHandle::new(tokio::spawn(async move {
            cancel.cancelled().await;
            scope.cancel();
        }));

        let workflow_id = input.id.to_string();
        let started = substrate.now();
        let completed_batches = Arc::new(AtomicUsize::new(0));
        let mut machine = WorkflowStateMachine::new(workflow_id.clone());

        log_workflow_operation(
            "run_workflow",
            &workflow_id,
            Some(input.dataset_id.as_str()),
            "started",
            Some(
                format!(
                    "{} batches, {} items, parallel_batches={}",
                    input.batches.len(),
                    input.total_items(),
                    input.parallel_batches
                )
                .as_str(),
            ),
        );

        let budget = Duration::from_secs(input.execution_timeout_seconds);
        let outcome = tokio::time::timeout(
            budget,
            self.execute(&substrate, &workflow_id, &input, &mut machine, &completed_batches),
        )
        .await;
        let elapsed = started.elapsed().as_secs_f64();

        let (status, error) = match outcome {
            Ok(Ok(output)) => {
                log_workflow_operation(
                    "run_workflow",
                    &workflow_id,
                    Some(input.dataset_id.as_str()),
                    "completed",
                    Some(
                        format!(
                            "{}/{} items successful",
                            output.successful_items, output.total_items
                        )
                        .as_str(),
                    ),
                );
                return output;
            }
            Ok(Err(error)) if error.is_cancellation() => (WorkflowStatus::Cancelled, error),
            Ok(Err(error)) => (WorkflowStatus::Failed, error),
            Err(_) => (
                WorkflowStatus::Failed,
                BatchflowError::WorkflowExecutionError {
                    message: format!(
                        "execution timeout of {}s exceeded",
                        input.execution_timeout_seconds
                    ),
                    workflow_id: Some(workflow_id.clone()),
                },
            ),
        };

        machine.finish(match status {
            WorkflowStatus::Cancelled => OrchestratorState::Cancelled,
            _ => OrchestratorState::Failed,
        });
        log_error("orchestrator", "run_workflow", &error);

        let error_summary = format!("Workflow failed: {error}");
        if status != WorkflowStatus::Cancelled {
            if let Some(webhook) = &input.notification_webhook {
                let event = NotificationEvent::new(events::WORKFLOW_FAILED, &workflow_id, webhook)
                    .with_priority(Priority::High)
                    .with_data("dataset_id", json!(input.dataset_id))
                    .with_data("error_message", json!(error_summary))
                    .with_data(
                        "processing_summary",
                        json!({
                            "total_batches": input.batches.len(),
                            "completed_batches": completed_batches.load(Ordering::SeqCst),
                        }),
                    );
                self.notify(event);
            }
        }

        log_workflow_operation(
            "run_workflow",
            &workflow_id,
            Some(input.dataset_id.as_str()),
            &status.to_string(),
            Some(error_summary.as_str()),
        );
        WorkflowOutput::failed(workflow_id, &input, status, error_summary, elapsed)
    }

    async fn execute(
        &self,
        substrate: &S,
        workflow_id: &str,
        input: &WorkflowInput,
        machine: &mut WorkflowStateMachine,
        completed_batches: &Arc<AtomicUsize>,
    ) -> Result<WorkflowOutput> {
        let started = substrate.now();
        input.validate()?;

        self.log_audit(workflow_id, input);
        machine.transition(OrchestratorState::AuditLogged)?;

        // aborted on drop if the run fails or times out first
        let monitor = start_monitor(substrate);
        machine.transition(OrchestratorState::MonitoringStarted)?;

        machine.transition(OrchestratorState::BatchesExecuting)?;
        let workflow = BatchWorkflow::new(
            substrate.clone(),
            Arc::clone(&self.executor),
            self.settings.clone(),
            input,
        );
        let batch_results = if input.processing_config.sequential {
            self.run_sequential(&workflow, workflow_id, input, completed_batches)
                .await?
        } else {
            self.run_parallel(&workflow, workflow_id, input, completed_batches)
                .await?
        };

        let report = self.validator.validate(&batch_results);
        machine.transition(OrchestratorState::Validated)?;

        let post_processing = if input.processing_config.enable_post_processing {
            machine.transition(OrchestratorState::PostProcessing)?;
            let (status, operation_id) = self.post_process(substrate, input).await?;
            let cleanup = self.cleanup_artifacts(substrate, &operation_id).await?;
            Some((status, cleanup))
        } else {
            None
        };

        machine.transition(OrchestratorState::NotifyingCompletion)?;
        let elapsed = started.elapsed().as_secs_f64();
        if let Some(webhook) = &input.notification_webhook {
            self.notify(completion_event(workflow_id, webhook, input, &report));
        }
        self.emit_metrics(input, &report.statistics, elapsed);

        reconcile_monitor(monitor).await;

        let mut output = WorkflowOutput::completed(
            workflow_id,
            input,
            batch_results,
            report.statistics,
            started.elapsed().as_secs_f64(),
        );
        if let Some((status, cleanup)) = post_processing {
            output = output
                .with_post_processing_status(status)
                .with_cleanup_result(cleanup);
        }

        machine.transition(OrchestratorState::Completed)?;
        Ok(output)
    }

    fn log_audit(&self, workflow_id: &str, input: &WorkflowInput) {
        let mut metadata = HashMap::new();
        metadata.insert("workflow_id".to_string(), json!(workflow_id));
        metadata.insert("total_batches".to_string(), json!(input.batches.len()));
        metadata.insert("total_items".to_string(), json!(input.total_items()));

        let record = AuditRecord::new(
            events::WORKFLOW_STARTED,
            "system",
            &input.dataset_id,
            "data_processing_orchestration",
            metadata,
        );
        let dispatcher = self.dispatcher.clone();
        self.substrate.spawn_detached("log_audit_event", async move {
            dispatcher.log_audit_event(&record).await
        });
    }

    async fn run_sequential(
        &self,
        workflow: &BatchWorkflow<S>,
        workflow_id: &str,
        input: &WorkflowInput,
        completed_batches: &Arc<AtomicUsize>,
    ) -> Result<Vec<BatchProcessingResult>> {
        let total = input.batches.len();
        let mut results = Vec::with_capacity(total);

        for (index, batch) in input.batches.iter().enumerate() {
            debug!(workflow_id = %workflow_id, batch = index + 1, total = total, "Dispatching batch");
            let result = workflow
                .run_or_degrade(workflow_id, index, Arc::new(batch.clone()))
                .await?;
            completed_batches.fetch_add(1, Ordering::SeqCst);
            results.push(result);

            let progress = MetricUpdate::new(
                metrics::BATCH_PROCESSING_PROGRESS,
                (index + 1) as f64 / total as f64 * 100.0,
            )
            .with_label("dataset_id", &input.dataset_id)
            .with_label("mode", "sequential");
            self.publish_metrics("batch_progress_metric", vec![progress]);
        }

        Ok(results)
    }

    async fn run_parallel(
        &self,
        workflow: &BatchWorkflow<S>,
        workflow_id: &str,
        input: &WorkflowInput,
        completed_batches: &Arc<AtomicUsize>,
    ) -> Result<Vec<BatchProcessingResult>> {
        let pool = BoundedPool::new(input.parallel_batches);
        info!(
            workflow_id = %workflow_id,
            batches = input.batches.len(),
            parallel_batches = pool.limit(),
            "Starting parallel batch fan-out"
        );

        let work = input
            .batches
            .iter()
            .enumerate()
            .map(|(index, batch)| {
                let workflow = workflow.clone();
                let workflow_id = workflow_id.to_string();
                let batch = Arc::new(batch.clone());
                let completed = Arc::clone(completed_batches);
                async move {
                    let result = workflow.run_or_degrade(&workflow_id, index, batch).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    result
                }
            })
            .collect();

        let outcomes = pool.run_all(work).await;

        let mut results = Vec::with_capacity(outcomes.len());
        for (batch, outcome) in input.batches.iter().zip(outcomes) {
            let result = match outcome {
                Ok(result) => result?,
                Err(join_error) => {
                    warn!(batch_id = %batch.id(), error = %join_error, "Batch task failed");
                    degraded(batch, &format!("Batch task failed: {join_error}"), 0.0)
                }
            };
            results.push(result);
        }

        Ok(results)
    }

    async fn post_process(
        &self,
        substrate: &S,
        input: &WorkflowInput,
    ) -> Result<(PostProcessingStatus, String)> {
        let mode = if input.processing_config.sequential {
            "sequential"
        } else {
            "parallel"
        };
        let operation = Arc::new(
            LongRunningOperationInput::new("post_processing", input.total_items() as u64)
                .with_work_unit_size(1000)
                .with_intervals(10, 5)
                .with_parameter("dataset_id", json!(input.dataset_id))
                .with_parameter("processing_mode", json!(mode))
                .with_parameter("complexity_factor", json!(0.5)),
        );
        let operation_id = operation.id.to_string();
        let options = UnitOptions::new("long_running_post_processing", POST_PROCESSING_TIMEOUT)
            .with_heartbeat_timeout(POST_PROCESSING_HEARTBEAT)
            .with_retry_policy(RetryPolicy::new(
                Duration::from_secs(10),
                Duration::from_secs(300),
                2.0,
                2,
            ));

        let processor = Arc::clone(&self.long_running);
        let outcome = substrate
            .execute_unit(options, move |ctx| {
                let processor = Arc::clone(&processor);
                let operation = Arc::clone(&operation);
                async move { processor.run(&operation, &*ctx).await }
            })
            .await;

        match outcome {
            Ok(output) => {
                info!(
                    dataset_id = %input.dataset_id,
                    status = %output.status,
                    completed_work_units = output.completed_work_units,
                    failed_work_units = output.failed_work_units,
                    "Post-processing finished"
                );
                let status = if output.is_partial() {
                    PostProcessingStatus::PartiallyCompleted
                } else if output.status.is_success() {
                    PostProcessingStatus::Completed
                } else {
                    PostProcessingStatus::Failed
                };
                Ok((status, operation_id))
            }
            Err(error) if error.is_cancellation() => Err(error),
            Err(error) => {
                log_error("orchestrator", "post_processing", &error);
                Ok((PostProcessingStatus::Failed, operation_id))
            }
        }
    }

    /// Never fails the run; only cancellation propagates
    async fn cleanup_artifacts(&self, substrate: &S, operation_id: &str) -> Result<CleanupResult> {
        let options = UnitOptions::new("cleanup_processing_artifacts", CLEANUP_TIMEOUT)
            .with_heartbeat_timeout(POST_PROCESSING_HEARTBEAT)
            .with_retry_policy(RetryPolicy::default().with_max_attempts(2));
        let cleanup = Arc::clone(&self.cleanup);
        let id = operation_id.to_string();
        let started = substrate.now();

        let outcome = substrate
            .execute_unit(options, move |ctx| {
                let cleanup = Arc::clone(&cleanup);
                let id = id.clone();
                async move { cleanup.cleanup_processing_artifacts(&id, &*ctx).await }
            })
            .await;

        match outcome {
            Ok(result) => Ok(result),
            Err(error) if error.is_cancellation() => Err(error),
            Err(error) => {
                log_error("orchestrator", "cleanup_processing_artifacts", &error);
                Ok(CleanupResult::failed(
                    operation_id,
                    &system::CLEANUP_TASKS,
                    &error.to_string(),
                    started.elapsed(),
                ))
            }
        }
    }

    fn notify(&self, event: NotificationEvent) {
        let dispatcher = self.dispatcher.clone();
        let name = format!("send_notification:{}", event.event_type);
        self.substrate.spawn_detached(&name, async move {
            dispatcher.send_notification(&event).await.map(|_| ())
        });
    }

    fn publish_metrics(&self, name: &str, updates: Vec<MetricUpdate>) {
        let dispatcher = self.dispatcher.clone();
        self.substrate
            .spawn_detached(name, async move { dispatcher.update_metrics(updates).await });
    }

    fn emit_metrics(&self, input: &WorkflowInput, statistics: &ValidationStatistics, elapsed: f64) {
        let updates = [
            (metrics::WORKFLOW_COMPLETED_TOTAL, 1.0),
            (metrics::ITEMS_PROCESSED_TOTAL, statistics.total_items as f64),
            (metrics::ITEMS_SUCCESSFUL_TOTAL, statistics.successful_items as f64),
            (metrics::ITEMS_FAILED_TOTAL, statistics.failed_items as f64),
            (metrics::PROCESSING_TIME_SECONDS, elapsed),
            (metrics::SUCCESS_RATE_PERCENTAGE, statistics.success_rate_percentage),
        ]
        .into_iter()
        .map(|(name, value)| MetricUpdate::new(name, value).with_label("dataset_id", &input.dataset_id))
        .collect();

        self.publish_metrics("update_metrics", updates);
    }
}

fn completion_event(
    workflow_id: &str,
    webhook: &str,
    input: &WorkflowInput,
    report: &ValidationReport,
) -> NotificationEvent {
    let statistics = &report.statistics;
    NotificationEvent::new(events::WORKFLOW_COMPLETED, workflow_id, webhook)
        .with_data("dataset_id", json!(input.dataset_id))
        .with_data("validation_result", json!(report))
        .with_data(
            "processing_summary",
            json!({
                "total_batches": input.batches.len(),
                "successful_items": statistics.successful_items,
                "failed_items": statistics.failed_items,
                "success_rate": statistics.success_rate_percentage,
            }),
        )
}

fn start_monitor<S: Substrate + Clone>(substrate: &S) -> UnitHandle<ResourceSnapshot> {
    let options = UnitOptions::new("monitor_system_resources", MONITOR_TIMEOUT)
        .with_retry_policy(RetryPolicy::default().with_max_attempts(2));
    substrate.start_unit(options, |ctx| async move {
        monitor_system_resources(&*ctx).await
    })
}

/// Give the monitor a short grace period; its outcome is only logged
async fn reconcile_monitor(monitor: UnitHandle<ResourceSnapshot>) {
    let name = monitor.name().to_string();

    match tokio::time::timeout(MONITOR_JOIN_WAIT, monitor.join()).await {
        Ok(Ok(snapshot)) => info!(
            cpu_percent = snapshot.cpu.utilization_percent,
            memory_percent = snapshot.memory.utilization_percent,
            disk_percent = snapshot.disk.utilization_percent,
            "Resource monitoring reconciled"
        ),
        Ok(Err(error)) => warn!(unit = %name, error = %error, "Resource monitoring failed"),
        // the timed-out join drops the handle, which aborts the unit
        Err(_) => warn!(unit = %name, "Resource monitoring still running, abandoned"),
    }
}
