//! Layered runtime configuration.
//!
//! Values come from built-in defaults, an optional `batchflow.{toml,yaml,json}`
//! file, and `BATCHFLOW__<SECTION>__<KEY>` environment variables, in that order.

use crate::error::{BatchflowError, Result};
use crate::execution::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const KNOWN_ENVIRONMENTS: &[&str] = &["development", "test", "staging", "production"];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchflowConfig {
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub workflow: WorkflowSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Default for BatchflowConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            workflow: WorkflowSettings::default(),
            notifications: NotificationSettings::default(),
            security: SecuritySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Limits and retry defaults for scheduled units of work
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowSettings {
    /// Upper bound on concurrently running item units inside one batch
    #[serde(default = "default_max_concurrent_activities")]
    pub max_concurrent_activities: usize,

    #[serde(default = "default_activity_max_attempts")]
    pub activity_max_attempts: u32,

    #[serde(default = "default_retry_initial_interval_seconds")]
    pub retry_initial_interval_seconds: f64,

    #[serde(default = "default_retry_max_interval_seconds")]
    pub retry_max_interval_seconds: f64,

    #[serde(default = "default_retry_backoff_coefficient")]
    pub retry_backoff_coefficient: f64,

    /// Heartbeat interval for long-running operations
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,

    #[serde(default = "default_progress_interval_seconds")]
    pub progress_interval_seconds: u64,

    /// Heartbeat budget handed to items processed outside a scheduled unit
    #[serde(default = "default_item_heartbeat_timeout_seconds")]
    pub item_heartbeat_timeout_seconds: u64,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_concurrent_activities: default_max_concurrent_activities(),
            activity_max_attempts: default_activity_max_attempts(),
            retry_initial_interval_seconds: default_retry_initial_interval_seconds(),
            retry_max_interval_seconds: default_retry_max_interval_seconds(),
            retry_backoff_coefficient: default_retry_backoff_coefficient(),
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
            progress_interval_seconds: default_progress_interval_seconds(),
            item_heartbeat_timeout_seconds: default_item_heartbeat_timeout_seconds(),
        }
    }
}

impl WorkflowSettings {
    /// Retry policy applied to batch activity units
    pub fn activity_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_secs_f64(self.retry_initial_interval_seconds),
            max_interval: Duration::from_secs_f64(self.retry_max_interval_seconds),
            backoff_coefficient: self.retry_backoff_coefficient,
            max_attempts: self.activity_max_attempts,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_seconds)
    }

    pub fn item_heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.item_heartbeat_timeout_seconds)
    }
}

/// Webhook delivery defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationSettings {
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,

    #[serde(default = "default_delivery_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_delivery_initial_delay_seconds")]
    pub initial_delay_seconds: f64,

    #[serde(default = "default_delivery_max_delay_seconds")]
    pub max_delay_seconds: f64,

    #[serde(default = "default_delivery_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            http_timeout_seconds: default_http_timeout_seconds(),
            max_attempts: default_delivery_max_attempts(),
            initial_delay_seconds: default_delivery_initial_delay_seconds(),
            max_delay_seconds: default_delivery_max_delay_seconds(),
            backoff_multiplier: default_delivery_backoff_multiplier(),
            user_agent: default_user_agent(),
        }
    }
}

impl NotificationSettings {
    pub fn delivery_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_secs_f64(self.initial_delay_seconds),
            max_interval: Duration::from_secs_f64(self.max_delay_seconds),
            backoff_coefficient: self.backoff_multiplier,
            max_attempts: self.max_attempts,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecuritySettings {
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            api_key_header: default_api_key_header(),
            api_key: None,
        }
    }
}

impl SecuritySettings {
    /// Header name and value to attach to webhook requests, when configured
    pub fn auth_header(&self) -> Option<(&str, &str)> {
        match (&self.api_key, self.api_key_header.is_empty()) {
            (Some(key), false) if !key.is_empty() => Some((self.api_key_header.as_str(), key)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Console,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Explicit filter directive; falls back to `RUST_LOG`, then the environment default
    #[serde(default)]
    pub level: Option<String>,

    #[serde(default)]
    pub format: LogFormat,
}

impl BatchflowConfig {
    /// Load configuration from the optional `batchflow` file and environment
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("batchflow").required(false))
            .add_source(
                config::Environment::with_prefix("BATCHFLOW")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: BatchflowConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            environment = %config.environment,
            max_concurrent_activities = config.workflow.max_concurrent_activities,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Load configuration from an explicit file, without environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: BatchflowConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !KNOWN_ENVIRONMENTS.contains(&self.environment.as_str()) {
            return Err(BatchflowError::configuration(
                format!("Unknown environment '{}'", self.environment),
                "environment",
            ));
        }
        if self.workflow.max_concurrent_activities == 0 {
            return Err(BatchflowError::configuration(
                "max_concurrent_activities must be at least 1",
                "workflow.max_concurrent_activities",
            ));
        }
        if self.workflow.activity_max_attempts == 0 {
            return Err(BatchflowError::configuration(
                "activity_max_attempts must be at least 1",
                "workflow.activity_max_attempts",
            ));
        }
        if self.workflow.retry_backoff_coefficient < 1.0 {
            return Err(BatchflowError::configuration(
                "retry_backoff_coefficient must be >= 1.0",
                "workflow.retry_backoff_coefficient",
            ));
        }
        if self.notifications.max_attempts == 0 {
            return Err(BatchflowError::configuration(
                "notification max_attempts must be at least 1",
                "notifications.max_attempts",
            ));
        }
        if self.notifications.backoff_multiplier < 1.0 {
            return Err(BatchflowError::configuration(
                "backoff_multiplier must be >= 1.0",
                "notifications.backoff_multiplier",
            ));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn default_environment() -> String {
    std::env::var("BATCHFLOW_ENV").unwrap_or_else(|_| "development".to_string())
}

fn default_max_concurrent_activities() -> usize {
    1000
}

fn default_activity_max_attempts() -> u32 {
    5
}

fn default_retry_initial_interval_seconds() -> f64 {
    1.0
}

fn default_retry_max_interval_seconds() -> f64 {
    60.0
}

fn default_retry_backoff_coefficient() -> f64 {
    2.0
}

fn default_heartbeat_interval_seconds() -> u64 {
    10
}

fn default_progress_interval_seconds() -> u64 {
    5
}

fn default_item_heartbeat_timeout_seconds() -> u64 {
    30
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_delivery_max_attempts() -> u32 {
    3
}

fn default_delivery_initial_delay_seconds() -> f64 {
    1.0
}

fn default_delivery_max_delay_seconds() -> f64 {
    60.0
}

fn default_delivery_backoff_multiplier() -> f64 {
    2.0
}

fn default_user_agent() -> String {
    format!("batchflow/{}", env!("CARGO_PKG_VERSION"))
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let cfg = BatchflowConfig {
            environment: "test".to_string(),
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.workflow.max_concurrent_activities, 1000);
        assert_eq!(cfg.workflow.activity_max_attempts, 5);
        assert_eq!(cfg.notifications.max_attempts, 3);
        assert_eq!(cfg.security.api_key_header, "X-API-Key");
        assert!(cfg.security.auth_header().is_none());
    }

    #[test]
    fn test_retry_policies_from_settings() {
        let workflow = WorkflowSettings::default();
        let policy = workflow.activity_retry_policy();
        assert_eq!(policy.initial_interval, Duration::from_secs(1));
        assert_eq!(policy.max_interval, Duration::from_secs(60));
        assert_eq!(policy.max_attempts, 5);

        let delivery = NotificationSettings::default().delivery_policy();
        assert_eq!(delivery.max_attempts, 3);
        assert_eq!(delivery.backoff_coefficient, 2.0);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = BatchflowConfig {
            environment: "test".to_string(),
            ..Default::default()
        };
        cfg.workflow.max_concurrent_activities = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrent_activities"));

        let cfg = BatchflowConfig {
            environment: "moon".to_string(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
environment = "production"

[workflow]
max_concurrent_activities = 16

[security]
api_key = "secret"

[logging]
format = "json"
"#
        )
        .unwrap();

        let cfg = BatchflowConfig::load_from(file.path()).unwrap();
        assert!(cfg.is_production());
        assert_eq!(cfg.workflow.max_concurrent_activities, 16);
        assert_eq!(cfg.workflow.heartbeat_interval_seconds, 10);
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.security.auth_header(), Some(("X-API-Key", "secret")));
    }
}
