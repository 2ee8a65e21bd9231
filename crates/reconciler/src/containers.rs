//! The set of live containers, rediscovered every cycle.

use berth_core::LoggedResultExt;
use tracing::{debug, info};

use crate::engine::{ContainerRecord, ContainerState, Engine};
use crate::error::Result;

/// Containers the engine knows about, minus exited ones.
#[derive(Debug, Clone, Default)]
pub struct ContainerRegistry {
    active: Vec<ContainerRecord>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the active set from the engine.
    ///
    /// Exited containers are removed from the engine and left out.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot list containers; the previous
    /// active set is kept in that case.
    pub async fn refresh(&mut self, engine: &dyn Engine) -> Result<()> {
        info!("Loading containers");
        let listed = engine.list_containers().await?;

        let mut active = Vec::with_capacity(listed.len());
        for container in listed {
            if container.state == ContainerState::Exited {
                debug!(container = %container.name, id = %container.id, "Removing exited container");
                remove_from_engine(engine, &container.id).await;
            } else {
                active.push(container);
            }
        }

        info!(active = active.len(), "Done loading containers");
        self.active = active;
        Ok(())
    }

    /// Forcibly remove a container and drop it from the active set.
    ///
    /// Best-effort: engine failures are logged, never returned.
    pub async fn remove(&mut self, engine: &dyn Engine, id: &str) {
        remove_from_engine(engine, id).await;
        self.active.retain(|container| container.id != id);
    }

    /// Track a container this process just created.
    pub fn insert(&mut self, record: ContainerRecord) {
        self.active.retain(|container| container.name != record.name);
        self.active.push(record);
    }

    pub fn active(&self) -> &[ContainerRecord] {
        &self.active
    }

    pub fn by_name(&self, name: &str) -> Option<&ContainerRecord> {
        self.active.iter().find(|container| container.name == name)
    }

    /// Ids of active containers running `image_id`.
    pub fn using_image(&self, image_id: &str) -> Vec<String> {
        self.active
            .iter()
            .filter(|container| container.image_id == image_id)
            .map(|container| container.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

async fn remove_from_engine(engine: &dyn Engine, id: &str) {
    if engine
        .remove_container(id)
        .await
        .ok_logged("Failed to remove container")
        .is_some()
    {
        info!(id = %id, "Removed container");
    }
}
