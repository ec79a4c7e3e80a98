//! # Processing
//!
//! The units of work a batch workflow schedules: per-item transformation,
//! whole-batch execution, result validation, long-running chunked operations,
//! artifact cleanup and host resource sampling.

pub mod batch_executor;
pub mod cleanup;
pub mod item_processor;
pub mod long_running;
pub mod resource_monitor;
pub mod validator;

pub use batch_executor::BatchExecutor;
pub use cleanup::{ArtifactCleaner, ArtifactCleanup, SimulatedArtifactCleaner};
pub use item_processor::{sha256_checksum, ItemProcessor, ItemTransform, UppercaseTransform};
pub use long_running::{LongRunningProcessor, SimulatedWorkRunner, WorkUnitRunner};
pub use resource_monitor::{monitor_system_resources, ResourceSnapshot};
pub use validator::ResultValidator;
