//! Rate-limited propagation of the registry to its public copy.
//!
//! Writes mark the registry dirty; the external action runs at most once per
//! interval. A failed publish never touches the registry and is only retried
//! in the next window.

use crate::clock::Clock;
use crate::config::PublishConfig;
use crate::error::PublishError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// The external publish step.
#[async_trait]
pub trait PublishAction: Send + Sync + 'static {
    async fn publish(&self) -> Result<(), PublishError>;
}

/// Runs a configured program and judges it by its exit status.
#[derive(Debug, Clone)]
pub struct ScriptPublisher {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ScriptPublisher {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &PublishConfig) -> Self {
        Self::new(&config.program, config.args.clone(), config.timeout())
    }
}

#[async_trait]
impl PublishAction for ScriptPublisher {
    async fn publish(&self) -> Result<(), PublishError> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| PublishError::Timeout {
                program: self.program.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| PublishError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }

        debug!(
            program = %self.program,
            stderr = %String::from_utf8_lossy(&output.stderr),
            "publish script output"
        );
        Err(PublishError::ExitStatus {
            program: self.program.clone(),
            status: output.status.to_string(),
        })
    }
}

/// Result of one scheduler check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Nothing changed since the last publish.
    Clean,
    /// Changes are waiting for the window to open.
    Deferred,
    Published,
    Failed,
}

#[derive(Debug)]
struct PublishState {
    last_publish_time: DateTime<Utc>,
    dirty: bool,
}

pub struct PublishScheduler {
    action: Arc<dyn PublishAction>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    state: Mutex<PublishState>,
}

impl PublishScheduler {
    /// The first window opens one interval after construction.
    pub fn new(action: Arc<dyn PublishAction>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        let started = clock.now();
        Self {
            action,
            clock,
            interval,
            state: Mutex::new(PublishState {
                last_publish_time: started,
                dirty: false,
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record a registry write and publish if the window is open.
    pub async fn maybe_publish(&self) -> PublishOutcome {
        self.state.lock().await.dirty = true;
        self.flush_if_due().await
    }

    /// Publish pending changes if the window is open. Driven by a timer so
    /// changes made in a closed window still go out.
    pub async fn flush_if_due(&self) -> PublishOutcome {
        let now = self.clock.now();
        {
            let mut state = self.state.lock().await;
            if !state.dirty {
                return PublishOutcome::Clean;
            }
            if !window_open(state.last_publish_time, now, self.interval) {
                return PublishOutcome::Deferred;
            }
            // Claim the window before running so concurrent callers back off.
            state.last_publish_time = now;
            state.dirty = false;
        }

        match self.action.publish().await {
            Ok(()) => {
                info!("registry published");
                PublishOutcome::Published
            }
            Err(e) => {
                error!(error = %e, "registry publish failed, retrying next window");
                self.state.lock().await.dirty = true;
                PublishOutcome::Failed
            }
        }
    }

    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.dirty
    }
}

fn window_open(last: DateTime<Utc>, now: DateTime<Utc>, interval: Duration) -> bool {
    now.signed_duration_since(last)
        .to_std()
        .is_ok_and(|elapsed| elapsed >= interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StepClock(std::sync::Mutex<DateTime<Utc>>);

    impl StepClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(std::sync::Mutex::new(
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            )))
        }

        fn advance(&self, secs: i64) {
            *self.0.lock().unwrap() += chrono::Duration::seconds(secs);
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[derive(Default)]
    struct CountingAction {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl PublishAction for CountingAction {
        async fn publish(&self) -> Result<(), PublishError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(PublishError::Other("push rejected".into()))
            } else {
                Ok(())
            }
        }
    }

    fn scheduler(clock: Arc<StepClock>, action: Arc<CountingAction>) -> PublishScheduler {
        PublishScheduler::new(action, clock, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn first_window_opens_an_interval_after_start() {
        let clock = StepClock::new();
        let action = Arc::new(CountingAction::default());
        let sched = scheduler(clock.clone(), action.clone());

        assert_eq!(sched.maybe_publish().await, PublishOutcome::Deferred);
        clock.advance(3600);
        assert_eq!(sched.flush_if_due().await, PublishOutcome::Published);
        assert_eq!(action.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn at_most_once_per_window() {
        let clock = StepClock::new();
        let action = Arc::new(CountingAction::default());
        let sched = scheduler(clock.clone(), action.clone());
        clock.advance(3600);

        assert_eq!(sched.maybe_publish().await, PublishOutcome::Published);
        assert_eq!(sched.maybe_publish().await, PublishOutcome::Deferred);
        clock.advance(1800);
        assert_eq!(sched.maybe_publish().await, PublishOutcome::Deferred);
        assert_eq!(action.calls.load(Ordering::SeqCst), 1);

        clock.advance(1800);
        assert_eq!(sched.flush_if_due().await, PublishOutcome::Published);
        assert_eq!(action.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn clean_registry_is_not_published() {
        let clock = StepClock::new();
        let action = Arc::new(CountingAction::default());
        let sched = scheduler(clock.clone(), action.clone());
        clock.advance(7200);

        assert_eq!(sched.flush_if_due().await, PublishOutcome::Clean);
        assert_eq!(action.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_waits_for_next_window() {
        let clock = StepClock::new();
        let action = Arc::new(CountingAction::default());
        action.fail.store(true, Ordering::SeqCst);
        let sched = scheduler(clock.clone(), action.clone());
        clock.advance(3600);

        assert_eq!(sched.maybe_publish().await, PublishOutcome::Failed);
        assert!(sched.is_dirty().await);
        assert_eq!(sched.flush_if_due().await, PublishOutcome::Deferred);

        action.fail.store(false, Ordering::SeqCst);
        clock.advance(3600);
        assert_eq!(sched.flush_if_due().await, PublishOutcome::Published);
        assert!(!sched.is_dirty().await);
        assert_eq!(action.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn clock_going_backwards_keeps_window_closed() {
        let clock = StepClock::new();
        let action = Arc::new(CountingAction::default());
        let sched = scheduler(clock.clone(), action.clone());
        clock.advance(-60);

        assert_eq!(sched.maybe_publish().await, PublishOutcome::Deferred);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_publisher_reports_exit_status() {
        let ok = ScriptPublisher::new("true", Vec::new(), Duration::from_secs(5));
        assert!(ok.publish().await.is_ok());

        let failing = ScriptPublisher::new("false", Vec::new(), Duration::from_secs(5));
        assert!(matches!(
            failing.publish().await,
            Err(PublishError::ExitStatus { .. })
        ));

        let missing = ScriptPublisher::new("/nonexistent/publish.sh", Vec::new(), Duration::from_secs(5));
        assert!(matches!(
            missing.publish().await,
            Err(PublishError::Spawn { .. })
        ));
    }
}
