#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Batchflow Core
//!
//! Batch-processing orchestration on top of a durable-execution substrate.
//!
//! ## Overview
//!
//! A workflow takes a dataset split into batches, fans the batches out to
//! bounded-concurrency workers as independently retried child units,
//! validates what comes back, optionally runs a long post-processing
//! operation, and reports the run through webhook notifications, audit
//! records and metrics. Side effects are detached: they never block the run
//! and never decide its outcome.
//!
//! ## Module Organization
//!
//! - [`execution`] - Substrate contract, unit scheduling, retry, detached tasks
//! - [`processing`] - Item processor, batch executor, validator, long-running processor
//! - [`notifications`] - Webhook delivery with backoff, audit and metrics sinks
//! - [`orchestration`] - Workflow state machine and orchestrator
//! - [`models`] - Validated value records
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup and helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use batchflow_core::config::BatchflowConfig;
//! use batchflow_core::constants::{Priority, ProcessingMode};
//! use batchflow_core::models::{DataBatch, DataItem, WorkflowInput};
//! use batchflow_core::orchestration::Orchestrator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BatchflowConfig::load()?;
//! let orchestrator = Orchestrator::local(&config)?;
//!
//! let items = vec![DataItem::from_text("hello")?, DataItem::from_text("world")?];
//! let batch = DataBatch::from_items(items, ProcessingMode::Parallel, Priority::Medium)?;
//! let output = orchestrator.run(WorkflowInput::new("dataset-1", vec![batch])).await;
//!
//! println!("{} of {} items succeeded", output.successful_items, output.total_items);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod logging;
pub mod models;
pub mod notifications;
pub mod orchestration;
pub mod processing;

pub use config::BatchflowConfig;
pub use error::{BatchflowError, ErrorCode, Result};
pub use execution::{ExecutionContext, LocalSubstrate, RetryPolicy, Substrate};
pub use models::{WorkflowInput, WorkflowOutput};
pub use orchestration::Orchestrator;
