//! Execution context handed to every running unit of work.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Calls a running unit makes back into its execution substrate
pub trait ExecutionContext: Send + Sync {
    /// Emit a liveness signal so a supervising heartbeat timeout does not fire
    fn heartbeat(&self, details: &str);

    /// Substrate clock
    fn now(&self) -> Instant;

    /// 1-based attempt number of the current execution
    fn attempt(&self) -> u32;

    /// Window within which a heartbeat must arrive, if supervised
    fn heartbeat_timeout(&self) -> Option<Duration>;

    fn cancellation(&self) -> CancellationToken;

    fn is_cancelled(&self) -> bool {
        self.cancellation().is_cancelled()
    }
}

/// In-process context for one attempt of one unit
#[derive(Debug)]
pub struct UnitContext {
    name: String,
    attempt: u32,
    heartbeat_timeout: Option<Duration>,
    cancel: CancellationToken,
    heartbeats: watch::Sender<Instant>,
    heartbeat_count: AtomicU64,
    last_details: Mutex<Option<String>>,
}

impl UnitContext {
    pub fn new(
        name: impl Into<String>,
        attempt: u32,
        heartbeat_timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        let (heartbeats, _) = watch::channel(Instant::now());
        Self {
            name: name.into(),
            attempt,
            heartbeat_timeout,
            cancel,
            heartbeats,
            heartbeat_count: AtomicU64::new(0),
            last_details: Mutex::new(None),
        }
    }

    /// Context for work run directly, outside any supervising unit
    pub fn standalone(name: impl Into<String>, heartbeat_timeout: Option<Duration>) -> Self {
        Self::new(name, 1, heartbeat_timeout, CancellationToken::new())
    }

    /// Receiver that observes every heartbeat
    pub fn subscribe(&self) -> watch::Receiver<Instant> {
        self.heartbeats.subscribe()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeat_count.load(Ordering::Relaxed)
    }

    pub fn last_heartbeat_details(&self) -> Option<String> {
        self.last_details.lock().clone()
    }
}

impl ExecutionContext for UnitContext {
    fn heartbeat(&self, details: &str) {
        self.heartbeat_count.fetch_add(1, Ordering::Relaxed);
        *self.last_details.lock() = Some(details.to_string());
        self.heartbeats.send_replace(Instant::now());
        trace!(unit = %self.name, attempt = self.attempt, details = %details, "heartbeat");
    }

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }

    fn heartbeat_timeout(&self) -> Option<Duration> {
        self.heartbeat_timeout
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_heartbeats_are_observable() {
        let ctx = UnitContext::standalone("unit", Some(Duration::from_secs(5)));
        let mut rx = ctx.subscribe();

        ctx.heartbeat("Processing item 1/3");
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        ctx.heartbeat("Processing item 2/3");
        assert_eq!(ctx.heartbeat_count(), 2);
        assert_eq!(
            ctx.last_heartbeat_details().as_deref(),
            Some("Processing item 2/3")
        );
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let ctx = UnitContext::new("unit", 2, None, token.child_token());
        assert_eq!(ctx.attempt(), 2);
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
