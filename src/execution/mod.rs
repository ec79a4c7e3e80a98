//! # Execution Layer
//!
//! Scheduling primitives the orchestration logic runs on: the per-unit
//! execution context, retry policies, scheduled units with timeouts and
//! heartbeat supervision, detached background tasks and a bounded worker pool.
//! All of it is reached through the [`Substrate`] trait so the same
//! orchestration code can run on the in-process [`LocalSubstrate`] or on a
//! durable engine.

pub mod context;
pub mod detached;
pub mod retry;
pub mod substrate;
pub mod unit;
pub mod worker_pool;

pub use context::{ExecutionContext, UnitContext};
pub use detached::{DetachedFailure, DetachedTasks};
pub use retry::RetryPolicy;
pub use substrate::{LocalSubstrate, Substrate, UnitHandle};
pub use unit::UnitOptions;
pub use worker_pool::{BoundedPool, PoolRun};
