//! Reconciler implementation.

use std::collections::BTreeSet;
use std::sync::Arc;

use berth_core::{Branch, ConfigCatalog};
use tracing::{debug, info, warn};

use crate::containers::ContainerRegistry;
use crate::engine::{ContainerRecord, ContainerState, Engine};
use crate::error::{Error, Result};
use crate::images::ImageCatalog;
use crate::lifecycle::{ContainerLifecycle, CreateOutcome};
use crate::types::{ReconcileAction, ReconcileResult, RemovalReason};

/// Configuration for the reconciler.
#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    /// Recreate containers even when they already run the active image.
    pub force_recreate: bool,
}

/// Keeps the host's containers on the newest image of their branch.
///
/// Owns the image and container bookkeeping; both are rebuilt from the
/// engine on every [`Reconciler::refresh`]. Callers serialize access,
/// typically by holding the reconciler behind a `tokio::sync::Mutex`.
pub struct Reconciler {
    /// Engine the reconciler drives.
    engine: Arc<dyn Engine>,
    /// Frozen branch configuration.
    catalog: Arc<ConfigCatalog>,
    /// Active image per repo tag.
    images: ImageCatalog,
    /// Live containers.
    containers: ContainerRegistry,
    /// Container creation and readiness checks.
    lifecycle: ContainerLifecycle,
    /// Configuration.
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler with empty bookkeeping.
    pub fn new(
        engine: Arc<dyn Engine>,
        catalog: Arc<ConfigCatalog>,
        config: ReconcilerConfig,
    ) -> Self {
        let lifecycle = ContainerLifecycle::new(engine.clone(), catalog.clone());
        Self {
            engine,
            catalog,
            images: ImageCatalog::new(),
            containers: ContainerRegistry::new(),
            lifecycle,
            config,
        }
    }

    /// Discover containers and images, then purge out-of-date containers
    /// if any tag's active image changed.
    ///
    /// Returns whether the active image set changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot list containers or images.
    pub async fn refresh(&mut self) -> Result<bool> {
        self.containers.refresh(self.engine.as_ref()).await?;
        let changed = self
            .images
            .refresh(self.engine.as_ref(), &mut self.containers)
            .await?;

        if changed {
            let purged = self.purge_out_of_date().await;
            debug!(
                removed = purged.removals(),
                recreated = purged.creations(),
                "Purged out-of-date containers"
            );
        }
        Ok(changed)
    }

    /// Remove or recreate every container that no longer matches its image
    /// or its branch.
    pub async fn purge_out_of_date(&mut self) -> ReconcileResult {
        info!("Removing out-of-date containers");

        let mut taken = Vec::new();
        let mut failed = Vec::new();
        let snapshot = self.containers.active().to_vec();

        for container in snapshot {
            let Some(active) = self.images.active(&container.image_tag).cloned() else {
                taken.push(self.remove(&container, RemovalReason::ImageMissing).await);
                continue;
            };

            if active.is_untagged() {
                taken.push(self.remove(&container, RemovalReason::ImageUntagged).await);
                continue;
            }

            if container.image_id != active.id {
                taken.push(self.remove(&container, RemovalReason::Superseded).await);

                let action = ReconcileAction::RecreateContainer {
                    name: container.name.clone(),
                    image: container.image_tag.clone(),
                };
                let ports = self
                    .catalog
                    .branch_for_container_name(&container.name)
                    .and_then(|branch| branch.port_bindings(&container.name))
                    .cloned()
                    .unwrap_or_else(|| container.port_bindings.clone());

                match self
                    .lifecycle
                    .create(&container.name, &container.image_tag, &ports)
                    .await
                {
                    Ok(CreateOutcome::Promoted { id }) => {
                        self.containers.insert(ContainerRecord {
                            id,
                            name: container.name.clone(),
                            image_id: active.id.clone(),
                            image_tag: container.image_tag.clone(),
                            state: ContainerState::Running,
                            port_bindings: ports,
                        });
                        taken.push(action);
                    }
                    Ok(CreateOutcome::TornDown { readiness, .. }) => {
                        failed.push((action, format!("{readiness:?}")));
                    }
                    Err(e) => {
                        warn!(container = %container.name, error = %e, "Recreate failed");
                        failed.push((action, e.to_string()));
                    }
                }
                continue;
            }

            let mismatched = self
                .catalog
                .branch_for_container_name(&container.name)
                .is_some_and(|branch| !active.has_tag(branch.image_tag()));
            if mismatched {
                taken.push(self.remove(&container, RemovalReason::BranchMismatch).await);
            }
        }

        ReconcileResult::new(taken, failed)
    }

    /// Make the containers running `branch`'s image match its desired
    /// container names.
    ///
    /// A branch whose image is not present yet is skipped. Failures of
    /// individual containers are reported in the result and left for the
    /// next cycle.
    pub async fn update_containers(&mut self, branch: &Branch) -> ReconcileResult {
        let Some(active) = self.images.active(branch.image_tag()).cloned() else {
            info!(branch = %branch.name(), image = %branch.image_tag(), "No image for branch yet, skipping");
            return ReconcileResult::skipped(branch.name());
        };

        info!(
            branch = %branch.name(),
            image = %branch.image_tag(),
            desired = branch.containers().len(),
            "Updating containers"
        );

        let mut taken = Vec::new();
        let mut failed = Vec::new();
        let mut missing: BTreeSet<String> = branch.containers().keys().cloned().collect();

        let running: Vec<ContainerRecord> = self
            .containers
            .active()
            .iter()
            .filter(|container| container.image_tag == branch.image_tag())
            .cloned()
            .collect();

        for container in running {
            if !branch.claims(&container.name) {
                taken.push(self.remove(&container, RemovalReason::Unwanted).await);
            } else if container.image_id != active.id {
                taken.push(self.remove(&container, RemovalReason::Superseded).await);
            } else if self.config.force_recreate {
                taken.push(self.remove(&container, RemovalReason::Forced).await);
            } else {
                info!(container = %container.name, id = %container.id, "Already up to date");
                missing.remove(&container.name);
            }
        }

        for name in missing {
            if let Some(conflict) = self.containers.by_name(&name).cloned() {
                taken.push(self.remove(&conflict, RemovalReason::NameConflict).await);
            }

            let action = ReconcileAction::CreateContainer {
                name: name.clone(),
                image: branch.image_tag().to_string(),
            };
            let ports = branch.port_bindings(&name).cloned().unwrap_or_default();

            match self.lifecycle.create(&name, branch.image_tag(), &ports).await {
                Ok(CreateOutcome::Promoted { id }) => {
                    info!(container = %name, id = %id, "Container ready");
                    self.containers.insert(ContainerRecord {
                        id,
                        name,
                        image_id: active.id.clone(),
                        image_tag: branch.image_tag().to_string(),
                        state: ContainerState::Running,
                        port_bindings: ports,
                    });
                    taken.push(action);
                }
                Ok(CreateOutcome::TornDown { readiness, .. }) => {
                    failed.push((action, format!("{readiness:?}")));
                }
                Err(e) => {
                    warn!(container = %name, error = %e, "Create failed");
                    failed.push((action, e.to_string()));
                }
            }
        }

        let result = ReconcileResult::new(taken, failed);
        if result.converged {
            info!(branch = %branch.name(), "Branch converged");
        } else {
            info!(
                branch = %branch.name(),
                actions_taken = result.actions_taken.len(),
                actions_failed = result.actions_failed.len(),
                "Update complete"
            );
        }
        result
    }

    /// Run [`Reconciler::update_containers`] for every configured branch.
    pub async fn update_all(&mut self) -> ReconcileResult {
        let catalog = self.catalog.clone();
        let mut result = ReconcileResult::unchanged();
        for branch in catalog.branches() {
            result.merge(self.update_containers(branch).await);
        }
        result
    }

    async fn remove(&mut self, container: &ContainerRecord, reason: RemovalReason) -> ReconcileAction {
        info!(container = %container.name, id = %container.id, reason = %reason, "Removing container");
        self.containers
            .remove(self.engine.as_ref(), &container.id)
            .await;
        ReconcileAction::RemoveContainer {
            name: container.name.clone(),
            id: container.id.clone(),
            reason,
        }
    }

    /// Get the image bookkeeping.
    pub fn images(&self) -> &ImageCatalog {
        &self.images
    }

    /// Get the container bookkeeping.
    pub fn containers(&self) -> &ContainerRegistry {
        &self.containers
    }

    /// Get the configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    engine: Option<Arc<dyn Engine>>,
    catalog: Option<Arc<ConfigCatalog>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            engine: None,
            catalog: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the engine.
    pub fn with_engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the branch catalog.
    pub fn with_catalog(mut self, catalog: Arc<ConfigCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable/disable forced recreation.
    pub fn force_recreate(mut self, enabled: bool) -> Self {
        self.config.force_recreate = enabled;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the engine or the catalog is missing.
    pub fn build(self) -> Result<Reconciler> {
        let engine = self
            .engine
            .ok_or_else(|| Error::invalid_config("Engine is required"))?;
        let catalog = self
            .catalog
            .ok_or_else(|| Error::invalid_config("Config catalog is required"))?;

        Ok(Reconciler::new(engine, catalog, self.config))
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
