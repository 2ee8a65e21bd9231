//! Pulling a branch's image and converging on it.

use std::sync::Arc;

use berth_core::{ConfigCatalog, RegistryCredentials};
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::engine::{Engine, PullEvent};
use crate::error::{Error, Result};
use crate::reconciler::Reconciler;
use crate::types::ReconcileResult;

/// Status the engine reports when the pulled tag already points at a local image.
const UP_TO_DATE: &str = "Image is up to date for";

/// The only statuses allowed to carry progress data, in display order.
const PROGRESS_STATUSES: [&str; 2] = ["Downloading", "Extracting"];

/// What a pull led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// The engine already had the newest image; nothing was touched.
    UpToDate,
    /// A new image arrived and the branch was converged on it.
    Converged(ReconcileResult),
}

impl PullOutcome {
    /// Whether convergence ran.
    pub const fn converged(&self) -> bool {
        matches!(self, Self::Converged(_))
    }
}

/// Compound progress display for an image pull.
///
/// Remembers the last "Downloading" and "Extracting" progress lines and
/// renders both, one per line.
#[derive(Debug, Default)]
pub struct PullProgress {
    last: [Option<String>; 2],
}

impl PullProgress {
    /// Record an event and return the text to display for it, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] when an event carries progress
    /// data under any status other than "Downloading" or "Extracting".
    pub fn observe(&mut self, event: &PullEvent) -> Result<Option<String>> {
        let status = event.status.as_deref();

        let Some(progress) = event.progress.as_deref() else {
            return Ok(status.map(|status| match event.id.as_deref() {
                Some(id) => format!("{id}: {status}"),
                None => status.to_string(),
            }));
        };

        let slot = status
            .and_then(|status| PROGRESS_STATUSES.iter().position(|known| *known == status))
            .and_then(|index| self.last.get_mut(index))
            .ok_or_else(|| {
                Error::protocol_violation(format!(
                    "only Downloading/Extracting carry progress, got status {status:?}"
                ))
            })?;
        *slot = Some(format!("{} {progress}", status.unwrap_or_default()));

        Ok(Some(self.render()))
    }

    fn render(&self) -> String {
        PROGRESS_STATUSES
            .iter()
            .zip(&self.last)
            .map(|(status, last)| last.clone().unwrap_or_else(|| (*status).to_string()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Pulls images for branches and converges them when something new arrived.
pub struct PullDriver {
    engine: Arc<dyn Engine>,
    catalog: Arc<ConfigCatalog>,
    credentials: RegistryCredentials,
    reconciler: Arc<Mutex<Reconciler>>,
}

impl PullDriver {
    /// Create a new pull driver sharing `reconciler` with other callers.
    pub fn new(
        engine: Arc<dyn Engine>,
        catalog: Arc<ConfigCatalog>,
        credentials: RegistryCredentials,
        reconciler: Arc<Mutex<Reconciler>>,
    ) -> Self {
        Self {
            engine,
            catalog,
            credentials,
            reconciler,
        }
    }

    /// Pull the image of the branch `tag` resolves to, then converge that
    /// branch if a new image arrived.
    ///
    /// The reconciler stays locked for the whole pull and convergence, so
    /// concurrent pulls run one after another.
    ///
    /// # Errors
    ///
    /// - [`Error::BranchNotFound`] if no branch matches `tag`; nothing is
    ///   pulled in that case.
    /// - [`Error::PullFailed`] or [`Error::ProtocolViolation`] if the pull
    ///   stream reports an error or an unknown progress event.
    /// - Engine errors from the pull or the discovery pass.
    pub async fn pull(&self, tag: &str) -> Result<PullOutcome> {
        let branch = self
            .catalog
            .branch_for_tag(tag)
            .ok_or_else(|| Error::branch_not_found(tag))?;

        let mut reconciler = self.reconciler.lock().await;

        info!(branch = %branch.name(), image = %branch.image_tag(), "Pulling image");
        let arrived = self.fetch(branch.image_tag()).await?;
        info!(image = %branch.image_tag(), arrived, "Pull complete");

        if !arrived {
            return Ok(PullOutcome::UpToDate);
        }

        reconciler.refresh().await?;
        let result = reconciler.update_containers(branch).await;
        Ok(PullOutcome::Converged(result))
    }

    /// Pull every branch's image in catalog order.
    ///
    /// A failing branch is logged and the next one is still pulled.
    /// Returns whether any pull brought a new image.
    pub async fn pull_all(&self) -> bool {
        let mut pulled_new = false;
        for branch in self.catalog.branches() {
            match self.pull(branch.image_tag()).await {
                Ok(outcome) => pulled_new |= outcome.converged(),
                Err(e) => {
                    warn!(branch = %branch.name(), error = %e, "Pull failed");
                }
            }
        }
        pulled_new
    }

    /// Pull every branch; if nothing new arrived, still run one discovery
    /// pass so the bookkeeping reflects the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if that discovery pass cannot list the engine's
    /// containers or images.
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing containers and images");
        if !self.pull_all().await {
            self.reconciler.lock().await.refresh().await?;
        }
        Ok(())
    }

    /// Stream a pull to completion; returns whether a new image arrived.
    async fn fetch(&self, image: &str) -> Result<bool> {
        let mut events = self.engine.pull_image(image, &self.credentials).await?;
        let mut progress = PullProgress::default();
        let mut arrived = true;

        while let Some(event) = events.next().await {
            let event = event?;

            if let Some(reason) = event.error {
                return Err(Error::pull_failed(image, reason));
            }
            if event
                .status
                .as_deref()
                .is_some_and(|status| status.contains(UP_TO_DATE))
            {
                arrived = false;
            }
            if let Some(rendered) = progress.observe(&event)? {
                debug!(image = %image, "{rendered}");
            }
        }

        Ok(arrived)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::time::Duration;

    use berth_core::Branch;

    use super::*;
    use crate::memory::{EngineCall, InMemoryEngine};
    use crate::reconciler::ReconcilerConfig;

    fn driver(engine: Arc<InMemoryEngine>) -> PullDriver {
        let release = Branch::builder("release", "alice/lgd:release")
            .readiness_marker("ready")
            .readiness_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let catalog = Arc::new(ConfigCatalog::new("alice", "lgd", vec![release]).unwrap());
        let reconciler = Reconciler::new(engine.clone(), catalog.clone(), ReconcilerConfig::default());
        PullDriver::new(
            engine,
            catalog,
            RegistryCredentials::default(),
            Arc::new(Mutex::new(reconciler)),
        )
    }

    #[test]
    fn test_progress_compound_display() {
        let mut progress = PullProgress::default();
        let first = progress
            .observe(&PullEvent::progress("Downloading", "[==>   ] 1MB/4MB"))
            .unwrap();
        assert_eq!(first.as_deref(), Some("Downloading [==>   ] 1MB/4MB\nExtracting"));

        let second = progress
            .observe(&PullEvent::progress("Extracting", "[=>    ] 512kB/4MB"))
            .unwrap();
        assert_eq!(
            second.as_deref(),
            Some("Downloading [==>   ] 1MB/4MB\nExtracting [=>    ] 512kB/4MB")
        );
    }

    #[test]
    fn test_progress_plain_status() {
        let mut progress = PullProgress::default();
        let line = progress.observe(&PullEvent::status("Pulling fs layer")).unwrap();
        assert_eq!(line.as_deref(), Some("Pulling fs layer"));
    }

    #[test]
    fn test_progress_under_unknown_status_is_violation() {
        let mut progress = PullProgress::default();
        let err = progress
            .observe(&PullEvent::progress("Verifying Checksum", "[==>]"))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_unknown_tag_has_no_side_effects() {
        let engine = Arc::new(InMemoryEngine::new());
        let driver = driver(engine.clone());

        let err = driver.pull("nightly").await.unwrap_err();
        assert!(matches!(err, Error::BranchNotFound { .. }));
        assert!(engine.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_pull_uses_branch_image_tag() {
        let engine = Arc::new(InMemoryEngine::new());
        let driver = driver(engine.clone());

        driver.pull("release").await.unwrap();
        assert_eq!(
            engine.calls().await,
            vec![EngineCall::Pull("alice/lgd:release".to_string())]
        );
    }

    #[tokio::test]
    async fn test_event_error_fails_pull() {
        let engine = Arc::new(InMemoryEngine::new());
        engine
            .stage_pull(
                "alice/lgd:release",
                vec![Ok(PullEvent {
                    error: Some("unauthorized".to_string()),
                    ..PullEvent::default()
                })],
                None,
            )
            .await;
        let driver = driver(engine.clone());

        let err = driver.pull("release").await.unwrap_err();
        assert!(matches!(err, Error::PullFailed { .. }));
    }
}
