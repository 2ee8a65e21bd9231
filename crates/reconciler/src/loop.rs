//! Local polling loop for hosts without webhook delivery.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::{error, info};

use crate::reconciler::Reconciler;

/// Configuration for the poll loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Wait after the first cycle and after any cycle that found a change.
    pub initial_delay: Duration,
    /// Added to the delay after every cycle that found nothing.
    pub step: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// Converge every branch on the first cycle even without a change.
    pub force_first: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            step: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            force_first: false,
        }
    }
}

/// Poll delay that grows while nothing changes.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    step: Duration,
    max: Duration,
}

impl Backoff {
    /// Create a backoff starting at the configured initial delay.
    pub fn new(config: &LoopConfig) -> Self {
        Self {
            current: config.initial_delay,
            initial: config.initial_delay,
            step: config.step,
            max: config.max_delay.max(config.initial_delay),
        }
    }

    /// Delay the next wait will use if nothing changes.
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Account for a finished cycle and return how long to wait before the
    /// next one.
    ///
    /// A change resets the delay to the initial one; every wait then grows
    /// the following delay by one step, up to the cap.
    pub fn next(&mut self, changed: bool) -> Duration {
        if changed {
            self.current = self.initial;
        }
        let delay = self.current;
        self.current = self.current.saturating_add(self.step).min(self.max);
        delay
    }
}

/// Polls the engine and converges every branch when an image changed.
///
/// Never stops on its own; use the [`LoopStopper`] returned by
/// [`PollLoop::new`].
pub struct PollLoop {
    /// The reconciler, shared with any other trigger.
    reconciler: Arc<Mutex<Reconciler>>,
    /// Loop configuration.
    config: LoopConfig,
    /// Stop signal receiver.
    stop_rx: watch::Receiver<bool>,
}

impl PollLoop {
    /// Create a new poll loop and the handle that stops it.
    pub fn new(reconciler: Arc<Mutex<Reconciler>>, config: LoopConfig) -> (Self, LoopStopper) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let poll = Self {
            reconciler,
            config,
            stop_rx,
        };
        (poll, LoopStopper { stop_tx })
    }

    /// Run until stopped. The first cycle starts immediately.
    pub async fn run(&mut self) {
        info!(
            initial_delay_ms = self.config.initial_delay.as_millis(),
            max_delay_ms = self.config.max_delay.as_millis(),
            "Starting poll loop"
        );

        let mut backoff = Backoff::new(&self.config);
        let mut force = self.config.force_first;

        loop {
            let changed = self.tick(force).await;
            force = false;
            let delay = backoff.next(changed);
            info!(delay_ms = delay.as_millis(), "Checking for new images");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = self.stop_rx.changed() => {
                    if *self.stop_rx.borrow() {
                        info!("Poll loop stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Run a single cycle; returns whether an image changed.
    ///
    /// A failed discovery pass is logged and counts as no change.
    pub async fn tick(&self, force: bool) -> bool {
        let mut reconciler = self.reconciler.lock().await;

        let changed = match reconciler.refresh().await {
            Ok(changed) => changed,
            Err(e) => {
                error!(error = %e, "Poll cycle failed");
                return false;
            }
        };

        if changed || force {
            let result = reconciler.update_all().await;
            info!(
                actions_taken = result.actions_taken.len(),
                actions_failed = result.actions_failed.len(),
                skipped = ?result.skipped_branches,
                "Poll cycle finished"
            );
        }
        changed
    }
}

/// Handle to stop a poll loop.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use berth_core::{Branch, ConfigCatalog};
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::engine::ImageRecord;
    use crate::memory::{EngineCall, InMemoryEngine};
    use crate::reconciler::ReconcilerConfig;

    fn setup() -> (Arc<InMemoryEngine>, Arc<Mutex<Reconciler>>) {
        let engine = Arc::new(InMemoryEngine::new());
        let release = Branch::builder("release", "alice/lgd:release")
            .readiness_marker("ready")
            .build()
            .unwrap();
        let catalog = Arc::new(ConfigCatalog::new("alice", "lgd", vec![release]).unwrap());
        let reconciler = Reconciler::new(engine.clone(), catalog, ReconcilerConfig::default());
        (engine, Arc::new(Mutex::new(reconciler)))
    }

    /// Given the default config
    /// When cycles find nothing
    /// Then each wait grows by the step until the cap
    #[test]
    fn backoff_grows_and_caps() {
        let mut backoff = Backoff::new(&LoopConfig::default());

        assert_eq!(backoff.next(false), Duration::from_secs(2));
        assert_eq!(backoff.next(false), Duration::from_secs(4));
        assert_eq!(backoff.next(false), Duration::from_secs(6));

        for _ in 0..20 {
            backoff.next(false);
        }
        assert_eq!(backoff.next(false), Duration::from_secs(30));
    }

    /// Given a grown delay
    /// When a cycle finds a change
    /// Then the next wait is the initial delay
    #[test]
    fn backoff_resets_on_change() {
        let mut backoff = Backoff::new(&LoopConfig::default());
        backoff.next(false);
        backoff.next(false);
        assert_eq!(backoff.next(true), Duration::from_secs(2));
        assert_eq!(backoff.current(), Duration::from_secs(4));
    }

    /// Given an engine that cannot list containers
    /// When a cycle runs
    /// Then it reports no change
    #[tokio::test]
    async fn failed_cycle_counts_as_unchanged() {
        let (engine, reconciler) = setup();
        engine.fail("list_containers").await;
        let (poll, _stopper) = PollLoop::new(reconciler, LoopConfig::default());

        assert!(!poll.tick(true).await);
    }

    /// Given a new image
    /// When two cycles run
    /// Then only the first reports a change
    #[tokio::test]
    async fn tick_reports_change_once() {
        let (engine, reconciler) = setup();
        engine
            .add_image(ImageRecord {
                id: "sha256:a".to_string(),
                repo_tags: vec!["alice/lgd:release".to_string()],
                created_at: DateTime::<Utc>::UNIX_EPOCH,
            })
            .await;
        let (poll, _stopper) = PollLoop::new(reconciler, LoopConfig::default());

        assert!(poll.tick(false).await);
        assert!(!poll.tick(false).await);
    }

    /// Given a loop that is running
    /// When stop() is called
    /// Then the loop should exit gracefully
    #[tokio::test(start_paused = true)]
    async fn stop_signal_terminates_loop() {
        let (engine, reconciler) = setup();
        let (mut poll, stopper) = PollLoop::new(reconciler, LoopConfig::default());

        let handle = tokio::spawn(async move { poll.run().await });
        tokio::time::sleep(Duration::from_secs(5)).await;
        stopper.stop();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "Loop should stop within timeout");
        assert!(engine.calls().await.contains(&EngineCall::ListContainers));
    }
}
