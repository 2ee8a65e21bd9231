//! Active-image bookkeeping: exactly one image per repo tag.

use std::collections::{HashMap, HashSet};

use berth_core::LoggedResultExt;
use itertools::Itertools;
use tracing::{debug, info};

use crate::containers::ContainerRegistry;
use crate::engine::{Engine, ImageRecord};
use crate::error::Result;

/// The newest image for every repo tag known to the engine.
#[derive(Debug, Clone, Default)]
pub struct ImageCatalog {
    active: HashMap<String, ImageRecord>,
}

impl ImageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the catalog from the engine.
    ///
    /// Untagged images are removed. For every repo tag the image with the
    /// greatest creation time stays active; images that are active for no
    /// tag are removed, together with the containers running them.
    ///
    /// Returns whether any tag's active image differs from before the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot list images; the catalog is
    /// left unchanged in that case.
    pub async fn refresh(
        &mut self,
        engine: &dyn Engine,
        containers: &mut ContainerRegistry,
    ) -> Result<bool> {
        info!("Loading images");
        let images = engine.list_images().await?;

        let (untagged, tagged): (Vec<_>, Vec<_>) =
            images.into_iter().partition(ImageRecord::is_untagged);

        for image in &untagged {
            debug!(id = %image.id, "Removing untagged image");
            remove_image(engine, containers, &image.id).await;
        }

        let active = newest_per_tag(&tagged);
        let keep: HashSet<&str> = active.values().map(|image| image.id.as_str()).collect();

        for image in tagged.iter().filter(|image| !keep.contains(image.id.as_str())) {
            debug!(id = %image.id, tags = ?image.repo_tags, "Removing superseded image");
            remove_image(engine, containers, &image.id).await;
        }

        let changed = self.differs_from(&active);
        if changed {
            for (tag, image) in &active {
                let previous = self.active.get(tag).map(|old| old.id.as_str());
                if previous != Some(image.id.as_str()) {
                    info!(tag = %tag, id = %image.id, "New active image");
                }
            }
        }

        self.active = active;
        info!(tags = self.active.len(), changed, "Done loading images");
        Ok(changed)
    }

    /// The active image for a repo tag.
    pub fn active(&self, tag: &str) -> Option<&ImageRecord> {
        self.active.get(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ImageRecord)> {
        self.active.iter().map(|(tag, image)| (tag.as_str(), image))
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    fn differs_from(&self, next: &HashMap<String, ImageRecord>) -> bool {
        self.active.len() != next.len()
            || next.iter().any(|(tag, image)| {
                self.active
                    .get(tag)
                    .is_none_or(|previous| previous.id != image.id)
            })
    }
}

/// Pick the newest image per tag; ties go to the greater id so the choice
/// does not depend on listing order.
fn newest_per_tag(images: &[ImageRecord]) -> HashMap<String, ImageRecord> {
    images
        .iter()
        .flat_map(|image| image.tags().map(move |tag| (tag.to_string(), image)))
        .into_group_map()
        .into_iter()
        .filter_map(|(tag, candidates)| {
            candidates
                .into_iter()
                .max_by(|a, b| {
                    a.created_at
                        .cmp(&b.created_at)
                        .then_with(|| a.id.cmp(&b.id))
                })
                .map(|newest| (tag, newest.clone()))
        })
        .collect()
}

/// Remove an image after removing every container running it.
async fn remove_image(engine: &dyn Engine, containers: &mut ContainerRegistry, image_id: &str) {
    for container_id in containers.using_image(image_id) {
        containers.remove(engine, &container_id).await;
    }

    if engine
        .remove_image(image_id)
        .await
        .ok_logged("Failed to remove image")
        .is_some()
    {
        info!(id = %image_id, "Removed image");
    }
}
