//! Detached, fire-and-forget background work.
//!
//! Errors and panics from detached tasks never reach the code that spawned
//! them. They are logged and recorded in a bounded side-channel failure log
//! instead, oldest entries rotating out first.

use crate::constants::system;
use crate::error::{BatchflowError, ErrorDetails};
use crate::logging::log_error;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

/// A recorded failure of a detached task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetachedFailure {
    pub task: String,
    pub error: ErrorDetails,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug)]
struct DetachedState {
    tracker: TaskTracker,
    drain_lock: tokio::sync::Mutex<()>,
    failures: Mutex<VecDeque<DetachedFailure>>,
    failure_capacity: usize,
}

/// Tracks detached tasks and their failures; clones share the same log
#[derive(Debug, Clone)]
pub struct DetachedTasks {
    state: Arc<DetachedState>,
}

impl Default for DetachedTasks {
    fn default() -> Self {
        Self::with_failure_capacity(system::MAX_DETACHED_FAILURES)
    }
}

impl DetachedTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` failures
    pub fn with_failure_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(DetachedState {
                tracker: TaskTracker::new(),
                drain_lock: tokio::sync::Mutex::new(()),
                failures: Mutex::new(VecDeque::new()),
                failure_capacity: capacity.max(1),
            }),
        }
    }

    /// Submit-and-continue; the caller never observes the outcome
    pub fn spawn<F>(&self, name: impl Into<String>, work: F)
    where
        F: Future<Output = Result<(), BatchflowError>> + Send + 'static,
    {
        let name = name.into();
        let state = Arc::clone(&self.state);

        self.state.tracker.spawn(async move {
            match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(())) => debug!(task = %name, "Detached task finished"),
                Ok(Err(error)) => record_failure(&state, &name, &error),
                Err(panic) => {
                    let error = BatchflowError::ActivityExecutionError {
                        message: format!("Detached task panicked: {}", panic_message(&*panic)),
                        activity_type: Some(name.clone()),
                        attempt: None,
                    };
                    record_failure(&state, &name, &error);
                }
            }
        });
    }

    /// Await every detached task spawned so far, including ones spawned while draining
    pub async fn drain(&self) {
        let _draining = self.state.drain_lock.lock().await;
        let tracker = &self.state.tracker;
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    /// Tasks still running; finished tasks are not retained
    pub fn pending(&self) -> usize {
        self.state.tracker.len()
    }

    pub fn failures(&self) -> Vec<DetachedFailure> {
        self.state.failures.lock().iter().cloned().collect()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn record_failure(state: &DetachedState, task: &str, error: &BatchflowError) {
    if matches!(error, BatchflowError::AuditLoggingError { .. }) {
        error!(
            task = %task,
            error = %error,
            "🚨 AUDIT_LOGGING_FAILURE: audit trail is incomplete"
        );
    }
    log_error("detached_task", task, error);

    let mut failures = state.failures.lock();
    if failures.len() == state.failure_capacity {
        failures.pop_front();
    }
    failures.push_back(DetachedFailure {
        task: task.to_string(),
        error: error.to_details(),
        occurred_at: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn test_failures_go_to_side_channel() {
        let tasks = DetachedTasks::new();
        tasks.spawn("ok", async { Ok(()) });
        tasks.spawn("audit", async {
            Err(BatchflowError::AuditLoggingError {
                message: "sink unavailable".into(),
                activity_id: "audit-1".into(),
            })
        });

        tasks.drain().await;

        let failures = tasks.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].task, "audit");
        assert_eq!(failures[0].error.error_code, ErrorCode::AuditLogging);
        assert_eq!(tasks.pending(), 0);
    }

    fn explode() -> Result<(), BatchflowError> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panics_are_recorded_on_drain() {
        let tasks = DetachedTasks::new();
        tasks.spawn("panicky", async { explode() });
        tasks.drain().await;

        let failures = tasks.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error.error_code, ErrorCode::ActivityExecution);
        assert!(failures[0].error.message.contains("boom"));
    }

    #[tokio::test]
    async fn test_drain_waits_for_nested_spawns() {
        let tasks = DetachedTasks::new();
        let inner = tasks.clone();
        tasks.spawn("outer", async move {
            inner.spawn("inner", async {
                Err(BatchflowError::processing("inner failed"))
            });
            Ok(())
        });

        tasks.drain().await;
        assert_eq!(tasks.failures().len(), 1);
        assert_eq!(tasks.failures()[0].task, "inner");
    }

    #[tokio::test]
    async fn test_finished_tasks_are_not_retained() {
        let tasks = DetachedTasks::new();
        for i in 0..1000 {
            tasks.spawn(format!("metric-{i}"), async { Ok(()) });
        }
        tasks.drain().await;
        assert_eq!(tasks.pending(), 0);
        assert_eq!(Arc::strong_count(&tasks.state), 1);

        // the tracker accepts work again after a drain
        tasks.spawn("late", async { Err(BatchflowError::processing("late failure")) });
        tasks.drain().await;
        assert_eq!(tasks.failures().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_log_rotates_oldest_out() {
        let tasks = DetachedTasks::with_failure_capacity(3);
        for i in 0..5 {
            tasks.spawn(format!("audit-{i}"), async move {
                Err(BatchflowError::processing(format!("failure {i}")))
            });
            tasks.drain().await;
        }

        let names: Vec<_> = tasks.failures().into_iter().map(|f| f.task).collect();
        assert_eq!(names, vec!["audit-2", "audit-3", "audit-4"]);
    }
}
