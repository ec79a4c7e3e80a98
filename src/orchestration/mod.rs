//! # Orchestration
//!
//! The workflow state machine and the code that drives a [`WorkflowInput`]
//! through it: batch child units, validation, post-processing and the
//! detached side effects that report on the run.
//!
//! [`WorkflowInput`]: crate::models::WorkflowInput

pub mod batch_workflow;
pub mod orchestrator;
pub mod state;

pub use batch_workflow::BatchWorkflow;
pub use orchestrator::Orchestrator;
pub use state::{OrchestratorState, StateTransition, WorkflowStateMachine};
