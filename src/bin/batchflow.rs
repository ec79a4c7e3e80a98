//! # Batchflow
//!
//! Drives one workflow end to end on the in-process substrate with generated
//! data, then prints the workflow output as JSON.

use anyhow::Context;
use batchflow_core::config::BatchflowConfig;
use batchflow_core::constants::{Priority, ProcessingMode};
use batchflow_core::logging::init_structured_logging;
use batchflow_core::models::{DataBatch, DataItem, ProcessingConfig, WorkflowInput};
use batchflow_core::orchestration::Orchestrator;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "batchflow")]
#[command(about = "Run batch-processing workflows")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (defaults to ./batchflow.{toml,yaml,json} when present)
    #[arg(short, long, env = "BATCHFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one workflow over generated data
    Run {
        dataset_id: String,

        #[arg(long, default_value_t = 3)]
        batches: usize,

        #[arg(long, default_value_t = 10)]
        items_per_batch: usize,

        /// Simulated size of each item in bytes
        #[arg(long, default_value_t = 2_000)]
        item_size: u64,

        /// Batches allowed in flight at once
        #[arg(long, default_value_t = 5)]
        parallel: usize,

        #[arg(long)]
        webhook: Option<String>,

        /// Run batches one after another
        #[arg(long)]
        sequential: bool,

        #[arg(long)]
        post_processing: bool,

        #[arg(long, default_value_t = 3)]
        max_retries: u32,
    },

    /// Print the effective configuration
    Config,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<BatchflowConfig> {
    let config = match path {
        Some(path) => BatchflowConfig::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => BatchflowConfig::load().context("failed to load configuration")?,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn generate_batches(
    dataset_id: &str,
    batches: usize,
    items_per_batch: usize,
    item_size: u64,
    mode: ProcessingMode,
) -> anyhow::Result<Vec<DataBatch>> {
    (0..batches)
        .map(|b| -> anyhow::Result<DataBatch> {
            let items = (0..items_per_batch)
                .map(|i| {
                    DataItem::new(
                        format!("{dataset_id} record {}-{}", b + 1, i + 1),
                        "text/plain",
                        item_size.max(1),
                    )
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(DataBatch::from_items(items, mode, Priority::Medium)?)
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_structured_logging(&config.logging);

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Run {
            dataset_id,
            batches,
            items_per_batch,
            item_size,
            parallel,
            webhook,
            sequential,
            post_processing,
            max_retries,
        } => {
            let mode = if sequential {
                ProcessingMode::Sequential
            } else {
                ProcessingMode::Parallel
            };
            let data = generate_batches(&dataset_id, batches, items_per_batch, item_size, mode)?;

            let mut input = WorkflowInput::new(&dataset_id, data)
                .with_parallel_batches(parallel)
                .with_processing_config(ProcessingConfig {
                    sequential,
                    max_retries,
                    enable_post_processing: post_processing,
                });
            if let Some(webhook) = webhook {
                input = input.with_notification_webhook(webhook);
            }

            let orchestrator = Orchestrator::local(&config)?;

            let cancel = CancellationToken::new();
            let shutdown = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling workflow");
                    shutdown.cancel();
                }
            });

            let output = orchestrator.run_with_cancellation(input, cancel).await;

            let detached = orchestrator.substrate().detached_tasks();
            detached.drain().await;
            for failure in detached.failures() {
                warn!(
                    task = %failure.task,
                    error_code = %failure.error.error_code,
                    error = %failure.error.message,
                    "Background task failed"
                );
            }

            info!(status = %output.status, "Workflow finished");
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
