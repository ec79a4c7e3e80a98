//! Orchestrator stage machine.

use crate::error::{BatchflowError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;
use tracing::debug;

/// Stages a workflow run passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Started,
    AuditLogged,
    MonitoringStarted,
    BatchesExecuting,
    Validated,
    PostProcessing,
    NotifyingCompletion,
    Completed,
    Failed,
    Cancelled,
}

impl OrchestratorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Forward edges of the happy path; `Failed` and `Cancelled` are reachable
    /// from any non-terminal stage after `Started`
    pub fn can_transition_to(&self, next: OrchestratorState) -> bool {
        use OrchestratorState::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Cancelled) {
            return true;
        }

        matches!(
            (self, next),
            (Started, AuditLogged)
                | (AuditLogged, MonitoringStarted)
                | (MonitoringStarted, BatchesExecuting)
                | (BatchesExecuting, Validated)
                | (Validated, PostProcessing)
                | (Validated, NotifyingCompletion)
                | (PostProcessing, NotifyingCompletion)
                | (NotifyingCompletion, Completed)
        )
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Started => "started",
            Self::AuditLogged => "audit_logged",
            Self::MonitoringStarted => "monitoring_started",
            Self::BatchesExecuting => "batches_executing",
            Self::Validated => "validated",
            Self::PostProcessing => "post_processing",
            Self::NotifyingCompletion => "notifying_completion",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One recorded transition
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub from: OrchestratorState,
    pub to: OrchestratorState,
    pub at: Instant,
}

#[derive(Debug)]
pub struct WorkflowStateMachine {
    workflow_id: String,
    current: OrchestratorState,
    history: Vec<StateTransition>,
}

impl WorkflowStateMachine {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            current: OrchestratorState::Started,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> OrchestratorState {
        self.current
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    pub fn transition(&mut self, next: OrchestratorState) -> Result<()> {
        if !self.current.can_transition_to(next) {
            return Err(BatchflowError::StateTransitionError {
                from: self.current.to_string(),
                to: next.to_string(),
            });
        }

        debug!(
            workflow_id = %self.workflow_id,
            from = %self.current,
            to = %next,
            "Workflow stage transition"
        );
        self.history.push(StateTransition {
            from: self.current,
            to: next,
            at: Instant::now(),
        });
        self.current = next;
        Ok(())
    }

    /// Move to a terminal state unless already in one
    pub fn finish(&mut self, terminal: OrchestratorState) {
        if !self.current.is_terminal() && self.current.can_transition_to(terminal) {
            let _ = self.transition(terminal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrchestratorState::*;

    #[test]
    fn test_happy_path_with_and_without_post_processing() {
        let mut machine = WorkflowStateMachine::new("wf-1");
        for next in [
            AuditLogged,
            MonitoringStarted,
            BatchesExecuting,
            Validated,
            PostProcessing,
            NotifyingCompletion,
            Completed,
        ] {
            machine.transition(next).unwrap();
        }
        assert_eq!(machine.current(), Completed);
        assert_eq!(machine.history().len(), 7);

        assert!(Validated.can_transition_to(NotifyingCompletion));
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut machine = WorkflowStateMachine::new("wf-2");
        let error = machine.transition(Validated).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Invalid state transition from started to validated"
        );

        machine.transition(Failed).unwrap();
        assert!(machine.transition(AuditLogged).is_err());
        machine.finish(Completed);
        assert_eq!(machine.current(), Failed);
    }

    #[test]
    fn test_failure_reachable_mid_run() {
        let mut machine = WorkflowStateMachine::new("wf-3");
        machine.transition(AuditLogged).unwrap();
        machine.transition(MonitoringStarted).unwrap();
        machine.finish(Cancelled);
        assert_eq!(machine.current(), Cancelled);
        assert_eq!(Cancelled.to_string(), "cancelled");
    }
}
