//! # Structured Logging Module
//!
//! Environment-aware `tracing` setup plus helpers that emit one structured
//! event per workflow or batch operation.

use crate::config::{LogFormat, LoggingSettings};
use crate::error::BatchflowError;
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; only the first call installs a subscriber, and
/// an already-installed global subscriber is left in place.
pub fn init_structured_logging(settings: &LoggingSettings) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = build_filter(settings, &environment);

        let layer = match settings.format {
            LogFormat::Console => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .json()
                .boxed(),
        };

        let subscriber = tracing_subscriber::registry().with(layer.with_filter(filter));

        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            format = ?settings.format,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn build_filter(settings: &LoggingSettings, environment: &str) -> EnvFilter {
    if let Some(level) = &settings.level {
        return EnvFilter::new(level);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(get_log_level(environment)))
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("BATCHFLOW_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for workflow operations
pub fn log_workflow_operation(
    operation: &str,
    workflow_id: &str,
    dataset_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        workflow_id = %workflow_id,
        dataset_id = dataset_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 WORKFLOW_OPERATION"
    );
}

/// Log structured data for batch operations
pub fn log_batch_operation(
    operation: &str,
    batch_id: &str,
    item_count: usize,
    status: &str,
    duration_ms: Option<u64>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        batch_id = %batch_id,
        item_count = item_count,
        status = %status,
        duration_ms = duration_ms,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📦 BATCH_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &BatchflowError) {
    let details = error.to_details();
    let context = serde_json::to_string(&details.context).unwrap_or_default();
    tracing::error!(
        component = %component,
        operation = %operation,
        error_code = %details.error_code,
        error = %details.message,
        context = %context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
