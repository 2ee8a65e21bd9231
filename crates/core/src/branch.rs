//! Deployment branches and the container settings they carry.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;

/// Default failure marker searched for in container logs.
pub const DEFAULT_FAILURE_MARKER: &str = "Next Build Failed";

/// Default time a new container has to print its readiness marker.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(300);

const CPU_PERIOD: i64 = 100_000;

/// One host-side binding for a container port.
///
/// Field names follow the engine's JSON so a binding reads the same in
/// config files and in the create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    pub host_port: String,
}

impl PortBinding {
    /// Binding on all host interfaces.
    pub fn new(host_port: impl Into<String>) -> Self {
        Self {
            host_ip: None,
            host_port: host_port.into(),
        }
    }

    /// Binding on a specific host interface.
    pub fn on_ip(host_ip: impl Into<String>, host_port: impl Into<String>) -> Self {
        Self {
            host_ip: Some(host_ip.into()),
            host_port: host_port.into(),
        }
    }
}

/// `"<containerPort>/<proto>"` mapped to its ordered host bindings.
pub type PortBindingSpec = BTreeMap<String, Vec<PortBinding>>;

/// Restart policy applied when a container is promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    UnlessStopped,
    OnFailure,
}

impl RestartPolicy {
    /// Engine name of the policy.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Always => "always",
            Self::UnlessStopped => "unless-stopped",
            Self::OnFailure => "on-failure",
        }
    }
}

/// CPU and memory allowance for a container.
///
/// Memory values are bytes; `memory_swap = -1` means unlimited swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    pub cpu_period: i64,
    pub cpu_quota: i64,
    pub memory: Option<i64>,
    pub memory_reservation: Option<i64>,
    pub memory_swap: Option<i64>,
    pub restart_policy: Option<RestartPolicy>,
}

impl ResourceLimits {
    /// Generous limits for the first start, when the app may still compile.
    pub const fn build() -> Self {
        Self {
            cpu_period: CPU_PERIOD,
            cpu_quota: CPU_PERIOD,
            memory: None,
            memory_reservation: None,
            memory_swap: None,
            restart_policy: None,
        }
    }

    /// Tightened limits applied once the container reported ready.
    pub const fn production() -> Self {
        Self {
            cpu_period: CPU_PERIOD,
            // 22% of one CPU
            cpu_quota: 22_000,
            memory: Some(250_000_000),
            memory_reservation: Some(150_000_000),
            memory_swap: Some(-1),
            restart_policy: Some(RestartPolicy::UnlessStopped),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::build()
    }
}

/// A partial `ResourceLimits` table from config.
///
/// Fields left out keep the value of the limits it is laid over, so a
/// production table that only sets `memory` still gets the production CPU
/// quota and restart policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsOverride {
    pub cpu_period: Option<i64>,
    pub cpu_quota: Option<i64>,
    pub memory: Option<i64>,
    pub memory_reservation: Option<i64>,
    pub memory_swap: Option<i64>,
    pub restart_policy: Option<RestartPolicy>,
}

impl LimitsOverride {
    /// Apply the fields this table sets on top of `base`.
    pub fn over(&self, base: ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            cpu_period: self.cpu_period.unwrap_or(base.cpu_period),
            cpu_quota: self.cpu_quota.unwrap_or(base.cpu_quota),
            memory: self.memory.or(base.memory),
            memory_reservation: self.memory_reservation.or(base.memory_reservation),
            memory_swap: self.memory_swap.or(base.memory_swap),
            restart_policy: self.restart_policy.or(base.restart_policy),
        }
    }
}

/// A named deployment target: one image tag and the containers run from it.
///
/// Branches are immutable once built; all fields are read through accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    name: String,
    image_tag: String,
    containers: BTreeMap<String, PortBindingSpec>,
    env: Vec<String>,
    volume_binds: Option<Vec<String>>,
    readiness_marker: String,
    failure_marker: String,
    readiness_timeout: Duration,
    build_limits: ResourceLimits,
    production_limits: ResourceLimits,
}

impl Branch {
    /// Start building a branch.
    pub fn builder(name: impl Into<String>, image_tag: impl Into<String>) -> BranchBuilder {
        BranchBuilder::new(name, image_tag)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Image reference every container of this branch runs.
    pub fn image_tag(&self) -> &str {
        &self.image_tag
    }

    /// Desired container names with their port bindings.
    pub fn containers(&self) -> &BTreeMap<String, PortBindingSpec> {
        &self.containers
    }

    pub fn port_bindings(&self, container_name: &str) -> Option<&PortBindingSpec> {
        self.containers.get(container_name)
    }

    pub fn claims(&self, container_name: &str) -> bool {
        self.containers.contains_key(container_name)
    }

    /// `KEY=VALUE` entries in the order they are handed to the engine.
    pub fn env(&self) -> &[String] {
        &self.env
    }

    pub fn volume_binds(&self) -> Option<&[String]> {
        self.volume_binds.as_deref()
    }

    pub fn readiness_marker(&self) -> &str {
        &self.readiness_marker
    }

    pub fn failure_marker(&self) -> &str {
        &self.failure_marker
    }

    pub const fn readiness_timeout(&self) -> Duration {
        self.readiness_timeout
    }

    pub const fn build_limits(&self) -> &ResourceLimits {
        &self.build_limits
    }

    pub const fn production_limits(&self) -> &ResourceLimits {
        &self.production_limits
    }
}

/// Builder for [`Branch`].
#[derive(Debug, Clone)]
pub struct BranchBuilder {
    name: String,
    image_tag: String,
    containers: BTreeMap<String, PortBindingSpec>,
    env: Vec<String>,
    volume_binds: Option<Vec<String>>,
    readiness_marker: String,
    failure_marker: String,
    readiness_timeout: Duration,
    build_limits: ResourceLimits,
    production_limits: ResourceLimits,
}

impl BranchBuilder {
    fn new(name: impl Into<String>, image_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_tag: image_tag.into(),
            containers: BTreeMap::new(),
            env: Vec::new(),
            volume_binds: None,
            readiness_marker: String::new(),
            failure_marker: DEFAULT_FAILURE_MARKER.to_string(),
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            build_limits: ResourceLimits::build(),
            production_limits: ResourceLimits::production(),
        }
    }

    /// Declare a desired container.
    #[must_use]
    pub fn container(mut self, name: impl Into<String>, ports: PortBindingSpec) -> Self {
        self.containers.insert(name.into(), ports);
        self
    }

    #[must_use]
    pub fn env<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env.extend(entries.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn volume_binds<I, S>(mut self, binds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.volume_binds = Some(binds.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn readiness_marker(mut self, marker: impl Into<String>) -> Self {
        self.readiness_marker = marker.into();
        self
    }

    #[must_use]
    pub fn failure_marker(mut self, marker: impl Into<String>) -> Self {
        self.failure_marker = marker.into();
        self
    }

    #[must_use]
    pub const fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    #[must_use]
    pub fn build_limits(mut self, limits: ResourceLimits) -> Self {
        self.build_limits = limits;
        self
    }

    #[must_use]
    pub fn production_limits(mut self, limits: ResourceLimits) -> Self {
        self.production_limits = limits;
        self
    }

    /// Validate and freeze the branch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBranch`] when the image tag or a marker is
    /// empty, or the readiness timeout is zero.
    pub fn build(self) -> Result<Branch> {
        if self.image_tag.trim().is_empty() {
            return Err(Error::invalid_branch(&self.name, "image tag is empty"));
        }
        if self.readiness_marker.is_empty() {
            return Err(Error::invalid_branch(&self.name, "readiness marker is empty"));
        }
        if self.failure_marker.is_empty() {
            return Err(Error::invalid_branch(&self.name, "failure marker is empty"));
        }
        if self.readiness_timeout.is_zero() {
            return Err(Error::invalid_branch(&self.name, "readiness timeout is zero"));
        }

        Ok(Branch {
            name: self.name,
            image_tag: self.image_tag,
            containers: self.containers,
            env: self.env,
            volume_binds: self.volume_binds,
            readiness_marker: self.readiness_marker,
            failure_marker: self.failure_marker,
            readiness_timeout: self.readiness_timeout,
            build_limits: self.build_limits,
            production_limits: self.production_limits,
        })
    }
}
