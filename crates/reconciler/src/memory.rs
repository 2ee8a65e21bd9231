//! In-memory container engine.
//!
//! Holds images and containers in process memory and records every call
//! made against it, so tests can assert on the exact engine traffic a
//! reconciliation produced. Pulls, log output and failures are scripted.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use berth_core::{RegistryCredentials, ResourceLimits};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;

use crate::engine::{
    ContainerRecord, ContainerState, CreateContainerRequest, Engine, ImageRecord, LogStream,
    PullEvent, PullStream,
};
use crate::error::{Error, Result};

/// One call received by [`InMemoryEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    ListImages,
    ListContainers,
    Pull(String),
    Create(CreateContainerRequest),
    Start(String),
    Logs(String),
    Update(String, ResourceLimits),
    RemoveContainer(String),
    RemoveImage(String),
}

/// Log output a container produces once followed.
#[derive(Debug, Clone, Default)]
pub struct LogScript {
    lines: Vec<(Duration, String)>,
    close: bool,
}

impl LogScript {
    /// Never prints and never closes.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Prints `line` after `delay`, then stays open.
    pub fn ready_after(delay: Duration, line: impl Into<String>) -> Self {
        Self::silent().line(delay, line)
    }

    /// Append a line printed `delay` after the previous one.
    #[must_use]
    pub fn line(mut self, delay: Duration, line: impl Into<String>) -> Self {
        self.lines.push((delay, line.into()));
        self
    }

    /// End the stream after the last line.
    #[must_use]
    pub const fn then_close(mut self) -> Self {
        self.close = true;
        self
    }

    fn into_stream(self) -> LogStream {
        let lines = stream::iter(self.lines).then(|(delay, line)| async move {
            tokio::time::sleep(delay).await;
            Ok(Bytes::from(format!("{line}\n")))
        });

        if self.close {
            lines.boxed()
        } else {
            lines.chain(stream::pending()).boxed()
        }
    }
}

#[derive(Debug, Default)]
struct StagedPull {
    events: Vec<Result<PullEvent>>,
    arrives: Option<ImageRecord>,
}

#[derive(Debug, Default)]
struct State {
    images: Vec<ImageRecord>,
    containers: Vec<ContainerRecord>,
    calls: Vec<EngineCall>,
    failing: HashSet<String>,
    pulls: HashMap<String, StagedPull>,
    logs: HashMap<String, LogScript>,
    next_id: u64,
}

impl State {
    fn check(&self, operation: &str) -> Result<()> {
        if self.failing.contains(operation) {
            Err(Error::engine_request(operation, "injected failure"))
        } else {
            Ok(())
        }
    }
}

/// [`Engine`] backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    state: Mutex<State>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_image(&self, image: ImageRecord) {
        self.state.lock().await.images.push(image);
    }

    pub async fn add_container(&self, container: ContainerRecord) {
        self.state.lock().await.containers.push(container);
    }

    pub async fn images(&self) -> Vec<ImageRecord> {
        self.state.lock().await.images.clone()
    }

    pub async fn containers(&self) -> Vec<ContainerRecord> {
        self.state.lock().await.containers.clone()
    }

    /// Every call received so far, in order.
    pub async fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Make `operation` (an [`Engine`] method name) fail until recovered.
    pub async fn fail(&self, operation: &str) {
        self.state.lock().await.failing.insert(operation.to_string());
    }

    pub async fn recover(&self, operation: &str) {
        self.state.lock().await.failing.remove(operation);
    }

    /// Script the next pull of `image`: the events it streams and the image
    /// that exists once it started.
    ///
    /// Unscripted pulls report the image as up to date.
    pub async fn stage_pull(
        &self,
        image: &str,
        events: Vec<Result<PullEvent>>,
        arrives: Option<ImageRecord>,
    ) {
        self.state
            .lock()
            .await
            .pulls
            .insert(image.to_string(), StagedPull { events, arrives });
    }

    /// Script the log output of the container named `name`.
    ///
    /// Containers without a script stay silent.
    pub async fn script_logs(&self, name: &str, script: LogScript) {
        self.state.lock().await.logs.insert(name.to_string(), script);
    }
}

#[async_trait]
impl Engine for InMemoryEngine {
    async fn list_images(&self) -> Result<Vec<ImageRecord>> {
        let mut state = self.state.lock().await;
        state.calls.push(EngineCall::ListImages);
        state.check("list_images")?;
        Ok(state.images.clone())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerRecord>> {
        let mut state = self.state.lock().await;
        state.calls.push(EngineCall::ListContainers);
        state.check("list_containers")?;
        Ok(state.containers.clone())
    }

    async fn pull_image(
        &self,
        image: &str,
        _credentials: &RegistryCredentials,
    ) -> Result<PullStream> {
        let mut state = self.state.lock().await;
        state.calls.push(EngineCall::Pull(image.to_string()));
        state.check("pull_image")?;

        let Some(staged) = state.pulls.remove(image) else {
            let up_to_date = PullEvent::status(format!("Status: Image is up to date for {image}"));
            return Ok(stream::iter(vec![Ok(up_to_date)]).boxed());
        };

        if let Some(arrived) = staged.arrives {
            state.images.push(arrived);
        }
        Ok(stream::iter(staged.events).boxed())
    }

    async fn create_container(&self, request: &CreateContainerRequest) -> Result<String> {
        let mut state = self.state.lock().await;
        state.calls.push(EngineCall::Create(request.clone()));
        state.check("create_container")?;

        if state.containers.iter().any(|c| c.name == request.name) {
            return Err(Error::engine_request(
                "create_container",
                format!("name '{}' is already in use", request.name),
            ));
        }

        state.next_id = state.next_id.saturating_add(1);
        let id = format!("c-{}", state.next_id);
        let image_id = state
            .images
            .iter()
            .find(|image| image.has_tag(&request.image))
            .map_or_else(|| request.image.clone(), |image| image.id.clone());

        state.containers.push(ContainerRecord {
            id: id.clone(),
            name: request.name.clone(),
            image_id,
            image_tag: request.image.clone(),
            state: ContainerState::Other("created".to_string()),
            port_bindings: request.port_bindings.clone(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(EngineCall::Start(id.to_string()));
        state.check("start_container")?;

        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::engine_request("start_container", format!("no such container: {id}")))?;
        container.state = ContainerState::Running;
        Ok(())
    }

    async fn container_logs(&self, id: &str) -> Result<LogStream> {
        let mut state = self.state.lock().await;
        state.calls.push(EngineCall::Logs(id.to_string()));
        state.check("container_logs")?;

        let name = state
            .containers
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.name.clone())
            .ok_or_else(|| Error::engine_request("container_logs", format!("no such container: {id}")))?;
        let script = state.logs.get(&name).cloned().unwrap_or_default();
        Ok(script.into_stream())
    }

    async fn update_container(&self, id: &str, limits: &ResourceLimits) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(EngineCall::Update(id.to_string(), limits.clone()));
        state.check("update_container")
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(EngineCall::RemoveContainer(id.to_string()));
        state.check("remove_container")?;

        let before = state.containers.len();
        state.containers.retain(|c| c.id != id);
        if state.containers.len() == before {
            return Err(Error::engine_request(
                "remove_container",
                format!("no such container: {id}"),
            ));
        }
        Ok(())
    }

    async fn remove_image(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(EngineCall::RemoveImage(id.to_string()));
        state.check("remove_image")?;

        let before = state.images.len();
        state.images.retain(|image| image.id != id);
        if state.images.len() == before {
            return Err(Error::engine_request(
                "remove_image",
                format!("no such image: {id}"),
            ));
        }
        Ok(())
    }
}
