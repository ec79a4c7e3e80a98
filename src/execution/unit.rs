use super::RetryPolicy;
use std::time::Duration;

/// Scheduling options for one unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOptions {
    pub name: String,
    /// Budget for a single attempt, from scheduling to completion
    pub schedule_to_close_timeout: Duration,
    pub heartbeat_timeout: Option<Duration>,
    pub retry_policy: RetryPolicy,
}

impl UnitOptions {
    pub fn new(name: impl Into<String>, schedule_to_close_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            schedule_to_close_timeout,
            heartbeat_timeout: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_heartbeat_timeout(mut self, heartbeat_timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(heartbeat_timeout);
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}
