//! The container engine boundary.
//!
//! Everything the reconciler knows about images and containers is
//! rediscovered through this trait on every cycle. [`crate::docker`]
//! implements it against the Docker Engine API; [`crate::memory`] is an
//! in-memory engine for tests.

use async_trait::async_trait;
use berth_core::{PortBindingSpec, RegistryCredentials, ResourceLimits};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::error::Result;

/// Repo tag the engine reports for images without a tag.
const UNTAGGED: &str = "<none>:<none>";

/// Stream of pull progress events.
pub type PullStream = BoxStream<'static, Result<PullEvent>>;

/// Combined stdout/stderr of a container, in follow mode.
///
/// Dropping the stream ends the subscription.
pub type LogStream = BoxStream<'static, Result<Bytes>>;

/// An image as listed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    /// Images without a real repo tag are never kept.
    pub fn is_untagged(&self) -> bool {
        self.repo_tags.iter().all(|tag| tag == UNTAGGED)
    }

    /// Repo tags other than the `<none>:<none>` placeholder.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.repo_tags
            .iter()
            .map(String::as_str)
            .filter(|tag| *tag != UNTAGGED)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().any(|candidate| candidate == tag)
    }
}

/// Container state as far as reconciliation cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Exited,
    Other(String),
}

impl ContainerState {
    pub fn parse(state: &str) -> Self {
        match state {
            "running" => Self::Running,
            "exited" => Self::Exited,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A container as listed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    /// Name without the engine's leading `/`.
    pub name: String,
    pub image_id: String,
    /// Image reference the container was created from.
    pub image_tag: String,
    pub state: ContainerState,
    /// Published ports as reported by the engine.
    pub port_bindings: PortBindingSpec,
}

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateContainerRequest {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub port_bindings: PortBindingSpec,
    pub volume_binds: Option<Vec<String>>,
    pub limits: ResourceLimits,
}

impl CreateContainerRequest {
    /// Container ports to expose, taken from the binding keys.
    pub fn exposed_ports(&self) -> impl Iterator<Item = &str> {
        self.port_bindings.keys().map(String::as_str)
    }
}

/// One progress message from an image pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullEvent {
    pub id: Option<String>,
    pub status: Option<String>,
    pub progress: Option<String>,
    pub error: Option<String>,
}

impl PullEvent {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }

    pub fn progress(status: impl Into<String>, progress: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            progress: Some(progress.into()),
            ..Self::default()
        }
    }
}

/// Operations the reconciler issues against a container engine.
#[async_trait]
pub trait Engine: Send + Sync {
    /// List all images.
    async fn list_images(&self) -> Result<Vec<ImageRecord>>;

    /// List all containers, stopped ones included.
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>>;

    /// Start pulling `image`; progress arrives on the returned stream.
    async fn pull_image(&self, image: &str, credentials: &RegistryCredentials)
    -> Result<PullStream>;

    /// Create a container and return its id.
    async fn create_container(&self, request: &CreateContainerRequest) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// Follow the combined stdout/stderr of a container.
    async fn container_logs(&self, id: &str) -> Result<LogStream>;

    /// Replace the resource limits of a running container.
    async fn update_container(&self, id: &str, limits: &ResourceLimits) -> Result<()>;

    /// Forcibly remove a container.
    async fn remove_container(&self, id: &str) -> Result<()>;

    async fn remove_image(&self, id: &str) -> Result<()>;
}
