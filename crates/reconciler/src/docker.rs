//! [`Engine`] implementation for the Docker Engine API.

use std::collections::HashMap;

use async_trait::async_trait;
use berth_core::{PortBinding, PortBindingSpec, RegistryCredentials, ResourceLimits, RestartPolicy};
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, UpdateContainerOptions,
};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{self, ContainerSummary, HostConfig, ImageSummary, RestartPolicyNameEnum};
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use tracing::debug;

use crate::engine::{
    ContainerRecord, ContainerState, CreateContainerRequest, Engine, ImageRecord, LogStream,
    PullEvent, PullStream,
};
use crate::error::{Error, Result};

/// Docker daemon reached through its local socket.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using the platform's default socket (or `DOCKER_HOST`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineUnavailable`] if no daemon can be reached.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::engine_unavailable(e.to_string()))?;
        let version = docker
            .version()
            .await
            .map_err(|e| Error::engine_unavailable(e.to_string()))?;
        debug!(version = ?version.version, api = ?version.api_version, "Connected to Docker");
        Ok(Self { docker })
    }
}

fn request_error(operation: &'static str) -> impl Fn(bollard::errors::Error) -> Error {
    move |e| match e {
        bollard::errors::Error::IOError { .. } => Error::engine_unavailable(e.to_string()),
        other => Error::engine_request(operation, other.to_string()),
    }
}

fn image_record(summary: ImageSummary) -> ImageRecord {
    ImageRecord {
        id: summary.id,
        repo_tags: summary.repo_tags,
        created_at: DateTime::<Utc>::from_timestamp(summary.created, 0)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    }
}

fn container_record(summary: ContainerSummary) -> ContainerRecord {
    let name = summary
        .names
        .unwrap_or_default()
        .into_iter()
        .next()
        .map(|name| name.trim_start_matches('/').to_string())
        .unwrap_or_default();

    let mut port_bindings = PortBindingSpec::new();
    for port in summary.ports.unwrap_or_default() {
        let Some(public) = port.public_port else {
            continue;
        };
        let protocol = port.typ.map_or_else(|| "tcp".to_string(), |typ| typ.to_string());
        let binding = match port.ip {
            Some(ip) if !ip.is_empty() => PortBinding::on_ip(ip, public.to_string()),
            _ => PortBinding::new(public.to_string()),
        };
        port_bindings
            .entry(format!("{}/{protocol}", port.private_port))
            .or_default()
            .push(binding);
    }

    ContainerRecord {
        id: summary.id.unwrap_or_default(),
        name,
        image_id: summary.image_id.unwrap_or_default(),
        image_tag: summary.image.unwrap_or_default(),
        state: ContainerState::parse(summary.state.as_deref().unwrap_or_default()),
        port_bindings,
    }
}

fn restart_policy(policy: RestartPolicy) -> models::RestartPolicy {
    let name = match policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
        RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
    };
    models::RestartPolicy {
        name: Some(name),
        maximum_retry_count: None,
    }
}

fn host_port_bindings(spec: &PortBindingSpec) -> HashMap<String, Option<Vec<models::PortBinding>>> {
    spec.iter()
        .map(|(container_port, bindings)| {
            let bindings = bindings
                .iter()
                .map(|binding| models::PortBinding {
                    host_ip: binding.host_ip.clone(),
                    host_port: Some(binding.host_port.clone()),
                })
                .collect();
            (container_port.clone(), Some(bindings))
        })
        .collect()
}

fn docker_credentials(credentials: &RegistryCredentials) -> Option<DockerCredentials> {
    if credentials.username.is_empty() {
        return None;
    }
    Some(DockerCredentials {
        username: Some(credentials.username.clone()),
        password: credentials.password.clone(),
        email: credentials.email.clone(),
        serveraddress: Some(credentials.server_address.clone()),
        ..Default::default()
    })
}

#[async_trait]
impl Engine for DockerEngine {
    async fn list_images(&self) -> Result<Vec<ImageRecord>> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };
        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(request_error("list_images"))?;
        Ok(images.into_iter().map(image_record).collect())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerRecord>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(request_error("list_containers"))?;
        Ok(containers.into_iter().map(container_record).collect())
    }

    async fn pull_image(
        &self,
        image: &str,
        credentials: &RegistryCredentials,
    ) -> Result<PullStream> {
        let options = CreateImageOptions::<String> {
            from_image: image.to_string(),
            ..Default::default()
        };
        let stream = self
            .docker
            .create_image(Some(options), None, docker_credentials(credentials))
            .map_ok(|info| PullEvent {
                id: info.id,
                status: info.status,
                progress: info.progress,
                error: info.error,
            })
            .map_err(request_error("pull_image"));
        Ok(stream.boxed())
    }

    async fn create_container(&self, request: &CreateContainerRequest) -> Result<String> {
        let limits = &request.limits;
        let host_config = HostConfig {
            port_bindings: Some(host_port_bindings(&request.port_bindings)),
            binds: request.volume_binds.clone(),
            cpu_period: Some(limits.cpu_period),
            cpu_quota: Some(limits.cpu_quota),
            memory: limits.memory,
            memory_reservation: limits.memory_reservation,
            memory_swap: limits.memory_swap,
            restart_policy: limits.restart_policy.map(restart_policy),
            ..Default::default()
        };
        let config = Config::<String> {
            image: Some(request.image.clone()),
            env: Some(request.env.clone()),
            exposed_ports: Some(
                request
                    .exposed_ports()
                    .map(|port| (port.to_string(), HashMap::new()))
                    .collect(),
            ),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: request.name.clone(),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(request_error("create_container"))?;
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(request_error("start_container"))
    }

    async fn container_logs(&self, id: &str) -> Result<LogStream> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let stream = self
            .docker
            .logs(id, Some(options))
            .map_ok(|output| output.into_bytes())
            .map_err(request_error("container_logs"));
        Ok(stream.boxed())
    }

    async fn update_container(&self, id: &str, limits: &ResourceLimits) -> Result<()> {
        let options = UpdateContainerOptions::<String> {
            cpu_period: Some(limits.cpu_period),
            cpu_quota: Some(limits.cpu_quota),
            memory: limits.memory,
            memory_reservation: limits.memory_reservation,
            memory_swap: limits.memory_swap,
            restart_policy: limits.restart_policy.map(restart_policy),
            ..Default::default()
        };
        self.docker
            .update_container(id, options)
            .await
            .map_err(request_error("update_container"))
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(request_error("remove_container"))
    }

    async fn remove_image(&self, id: &str) -> Result<()> {
        self.docker
            .remove_image(id, None, None)
            .await
            .map(|_| ())
            .map_err(request_error("remove_image"))
    }
}

#[cfg(test)]
mod tests {
    use bollard::models::{Port, PortTypeEnum};

    use super::*;

    #[test]
    fn test_container_record_strips_name_slash_and_maps_ports() {
        let summary = ContainerSummary {
            id: Some("c1".to_string()),
            names: Some(vec!["/lgd0".to_string()]),
            image: Some("alice/lgd:release".to_string()),
            image_id: Some("sha256:a".to_string()),
            state: Some("running".to_string()),
            ports: Some(vec![Port {
                ip: Some("0.0.0.0".to_string()),
                private_port: 5000,
                public_port: Some(80),
                typ: Some(PortTypeEnum::TCP),
            }]),
            ..Default::default()
        };

        let record = container_record(summary);
        assert_eq!(record.name, "lgd0");
        assert_eq!(record.state, ContainerState::Running);
        assert_eq!(
            record.port_bindings.get("5000/tcp"),
            Some(&vec![PortBinding::on_ip("0.0.0.0", "80")])
        );
    }

    #[test]
    fn test_unpublished_ports_are_skipped() {
        let summary = ContainerSummary {
            ports: Some(vec![Port {
                ip: None,
                private_port: 5000,
                public_port: None,
                typ: Some(PortTypeEnum::TCP),
            }]),
            ..Default::default()
        };
        assert!(container_record(summary).port_bindings.is_empty());
    }

    #[test]
    fn test_host_port_bindings_keep_host_port_verbatim() {
        let spec = PortBindingSpec::from([(
            "5000/tcp".to_string(),
            vec![PortBinding::new("6006/tcp")],
        )]);
        let bindings = host_port_bindings(&spec);
        let binding = bindings
            .get("5000/tcp")
            .and_then(Option::as_ref)
            .and_then(|list| list.first());
        assert_eq!(
            binding.and_then(|b| b.host_port.as_deref()),
            Some("6006/tcp")
        );
        assert!(binding.is_some_and(|b| b.host_ip.is_none()));
    }

    #[test]
    fn test_anonymous_pull_sends_no_credentials() {
        assert!(docker_credentials(&RegistryCredentials::default()).is_none());
        let credentials = RegistryCredentials {
            username: "alice".to_string(),
            password: Some("token".to_string()),
            email: None,
            server_address: "https://index.docker.io/v1".to_string(),
        };
        let docker = docker_credentials(&credentials);
        assert_eq!(docker.and_then(|c| c.username).as_deref(), Some("alice"));
    }
}
