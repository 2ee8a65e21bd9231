//! File-backed configuration.
//!
//! The daemon reads one TOML file (default `berth.toml`) describing the
//! registry, the webhook listener, the poll loop and every branch. Registry
//! credentials may be overridden from the environment (`DOCKER_USERNAME`,
//! `DOCKER_TOKEN`, `DOCKER_EMAIL`) so secrets stay out of the file.
//!
//! ```toml
//! [registry]
//! username = "alice"
//!
//! [webhook]
//! repository = "lgd"
//!
//! [branches.dev]
//! image = "{user}/lgd:latest-dev"
//! readiness_marker = "LGD is running on port"
//! env_file = "dev.env"
//!
//! [branches.dev.containers.dev0]
//! "5000/tcp" = [{ HostPort = "6006/tcp" }]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::branch::{Branch, LimitsOverride, PortBindingSpec, ResourceLimits};
use crate::catalog::ConfigCatalog;
use crate::env_file::read_env_file;
use crate::error::Error;
use crate::result::Result;

pub const DEFAULT_CONFIG_PATH: &str = "berth.toml";
pub const DEFAULT_SERVER_ADDRESS: &str = "https://index.docker.io/v1";

/// Placeholder in branch image references replaced by the registry user.
const USER_PLACEHOLDER: &str = "{user}";

/// Credentials sent with every image pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: Option<String>,
    pub email: Option<String>,
    pub server_address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub username: String,
    pub password: Option<String>,
    pub email: Option<String>,
    pub server_address: String,
    /// Image (repository) name used to qualify bare tags, e.g. `lgd`.
    pub image: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: None,
            email: None,
            server_address: DEFAULT_SERVER_ADDRESS.to_string(),
            image: "lgd".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub bind_address: String,
    /// `repository.name` every push notification must carry.
    pub repository: String,
    /// Accepted `push_data.pusher`; defaults to the registry user.
    pub trusted_pusher: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            repository: "lgd".to_string(),
            trusted_pusher: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub initial_delay_ms: u64,
    pub step_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_000,
            step_ms: 2_000,
            max_delay_ms: 30_000,
        }
    }
}

impl PollConfig {
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub const fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }

    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// One `[branches.<name>]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct BranchConfig {
    pub image: String,
    #[serde(default)]
    pub containers: BTreeMap<String, PortBindingSpec>,
    #[serde(default)]
    pub env: Vec<String>,
    /// Appended after `env`; relative paths resolve against the config file.
    pub env_file: Option<PathBuf>,
    pub volume_binds: Option<Vec<String>>,
    pub readiness_marker: String,
    pub failure_marker: Option<String>,
    pub readiness_timeout_secs: Option<u64>,
    /// Laid over [`ResourceLimits::build`].
    pub build_limits: Option<LimitsOverride>,
    /// Laid over [`ResourceLimits::production`].
    pub production_limits: Option<LimitsOverride>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub registry: RegistryConfig,
    pub webhook: WebhookConfig,
    pub poll: PollConfig,
    pub branches: BTreeMap<String, BranchConfig>,
}

impl AppConfig {
    /// Load configuration from a TOML file, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config_read_failed(path, e.to_string()))?;
        let mut config = Self::from_toml(&contents, path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse configuration text; `origin` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TomlParseFailed`] on malformed TOML.
    pub fn from_toml(contents: &str, origin: &Path) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::toml_parse_failed(origin, e.to_string()))
    }

    /// Override registry credentials from `DOCKER_USERNAME`, `DOCKER_TOKEN`
    /// and `DOCKER_EMAIL` when `lookup` finds them.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(username) = lookup("DOCKER_USERNAME") {
            self.registry.username = username;
        }
        if let Some(token) = lookup("DOCKER_TOKEN") {
            self.registry.password = Some(token);
        }
        if let Some(email) = lookup("DOCKER_EMAIL") {
            self.registry.email = Some(email);
        }
    }

    pub fn credentials(&self) -> RegistryCredentials {
        RegistryCredentials {
            username: self.registry.username.clone(),
            password: self.registry.password.clone(),
            email: self.registry.email.clone(),
            server_address: self.registry.server_address.clone(),
        }
    }

    /// The pusher identity webhook notifications must come from.
    pub fn trusted_pusher(&self) -> &str {
        self.webhook
            .trusted_pusher
            .as_deref()
            .unwrap_or(&self.registry.username)
    }

    /// Freeze the branch tables into a [`ConfigCatalog`].
    ///
    /// Env files are read here, relative to `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if an env file cannot be read, a branch is invalid,
    /// or two branches claim the same container name.
    pub fn catalog(&self, base_dir: &Path) -> Result<ConfigCatalog> {
        if self.branches.is_empty() {
            return Err(Error::invalid_config("no branches configured"));
        }

        let branches = self
            .branches
            .iter()
            .map(|(name, branch)| self.build_branch(name, branch, base_dir))
            .collect::<Result<Vec<_>>>()?;

        ConfigCatalog::new(&self.registry.username, &self.registry.image, branches)
    }

    fn build_branch(&self, name: &str, config: &BranchConfig, base_dir: &Path) -> Result<Branch> {
        let image = config.image.replace(USER_PLACEHOLDER, &self.registry.username);

        let file_env = match &config.env_file {
            Some(path) => read_env_file(&base_dir.join(path))?,
            None => Vec::new(),
        };

        let mut builder = Branch::builder(name, image)
            .env(config.env.iter().cloned())
            .env(file_env)
            .readiness_marker(&config.readiness_marker);

        for (container, ports) in &config.containers {
            builder = builder.container(container, ports.clone());
        }
        if let Some(binds) = &config.volume_binds {
            builder = builder.volume_binds(binds.iter().cloned());
        }
        if let Some(marker) = &config.failure_marker {
            builder = builder.failure_marker(marker);
        }
        if let Some(secs) = config.readiness_timeout_secs {
            builder = builder.readiness_timeout(Duration::from_secs(secs));
        }
        if let Some(limits) = &config.build_limits {
            builder = builder.build_limits(limits.over(ResourceLimits::build()));
        }
        if let Some(limits) = &config.production_limits {
            builder = builder.production_limits(limits.over(ResourceLimits::production()));
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use std::collections::HashMap;

    use super::*;
    use crate::branch::{PortBinding, RestartPolicy};

    const SAMPLE: &str = r#"
[registry]
username = "alice"

[webhook]
repository = "lgd"

[branches.dev]
image = "{user}/lgd:latest-dev"
readiness_marker = "LGD is running on port"
env = ["NODE_ENV=production"]
readiness_timeout_secs = 60

[branches.dev.containers.dev0]
"5000/tcp" = [{ HostPort = "6006/tcp" }]

[branches.server]
image = "{user}/lgd:server"
readiness_marker = "Server is listening on "
volume_binds = ["nginx:/home/lgd/nginx/"]

[branches.server.containers.server]
"8082/tcp" = [{ HostIp = "172.31.18.195", HostPort = "8082/tcp" }]

[branches.server.production_limits]
cpu_quota = 50000
memory = 512000000
restart_policy = "always"
"#;

    fn sample() -> AppConfig {
        AppConfig::from_toml(SAMPLE, Path::new("berth.toml")).unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = sample();
        assert_eq!(config.registry.server_address, DEFAULT_SERVER_ADDRESS);
        assert_eq!(config.webhook.bind_address, "0.0.0.0:8080");
        assert_eq!(config.poll.initial_delay(), Duration::from_secs(2));
        assert_eq!(config.poll.max_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_catalog_expands_user_placeholder() {
        let catalog = sample().catalog(Path::new(".")).unwrap();
        let dev = catalog.branch("dev").unwrap();
        assert_eq!(dev.image_tag(), "alice/lgd:latest-dev");
        assert_eq!(dev.readiness_timeout(), Duration::from_secs(60));
        assert_eq!(
            dev.port_bindings("dev0"),
            Some(&BTreeMap::from([(
                "5000/tcp".to_string(),
                vec![PortBinding::new("6006/tcp")]
            )]))
        );
    }

    #[test]
    fn test_partial_limits_fill_missing_fields() {
        let catalog = sample().catalog(Path::new(".")).unwrap();
        let server = catalog.branch("server").unwrap();
        let limits = server.production_limits();
        assert_eq!(limits.cpu_quota, 50_000);
        assert_eq!(limits.cpu_period, 100_000);
        assert_eq!(limits.memory, Some(512_000_000));
        assert_eq!(limits.restart_policy, Some(RestartPolicy::Always));
        assert_eq!(server.volume_binds(), Some(&["nginx:/home/lgd/nginx/".to_string()][..]));
    }

    #[test]
    fn test_single_production_field_keeps_production_defaults() {
        let text = SAMPLE.replace(
            "cpu_quota = 50000\nmemory = 512000000\nrestart_policy = \"always\"",
            "memory = 512000000",
        );
        let catalog = AppConfig::from_toml(&text, Path::new("berth.toml"))
            .unwrap()
            .catalog(Path::new("."))
            .unwrap();
        let server = catalog.branch("server").unwrap();

        let expected = ResourceLimits {
            memory: Some(512_000_000),
            ..ResourceLimits::production()
        };
        assert_eq!(server.production_limits(), &expected);
        assert_eq!(server.build_limits(), &ResourceLimits::build());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = sample();
        let env: HashMap<&str, &str> =
            HashMap::from([("DOCKER_USERNAME", "bob"), ("DOCKER_TOKEN", "s3cret")]);
        config.apply_env_overrides(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.registry.username, "bob");
        assert_eq!(config.credentials().password.as_deref(), Some("s3cret"));
        assert_eq!(config.credentials().email, None);
        assert_eq!(config.trusted_pusher(), "bob");
    }

    #[test]
    fn test_env_file_is_appended_after_inline_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("dev.env"), "API_KEY=abc\n\nPORT=5000\n").unwrap();

        let text = SAMPLE.replace(
            "env = [\"NODE_ENV=production\"]",
            "env = [\"NODE_ENV=production\"]\nenv_file = \"dev.env\"",
        );
        let config = AppConfig::from_toml(&text, Path::new("berth.toml")).unwrap();
        let catalog = config.catalog(dir.path()).unwrap();

        assert_eq!(
            catalog.branch("dev").unwrap().env(),
            &["NODE_ENV=production", "API_KEY=abc", "PORT=5000"]
        );
    }

    #[test]
    fn test_missing_env_file_fails_catalog() {
        let text = SAMPLE.replace(
            "readiness_timeout_secs = 60",
            "readiness_timeout_secs = 60\nenv_file = \"nope.env\"",
        );
        let config = AppConfig::from_toml(&text, Path::new("berth.toml")).unwrap();
        assert!(matches!(
            config.catalog(Path::new("/nonexistent")),
            Err(Error::EnvFileReadFailed { .. })
        ));
    }

    #[test]
    fn test_empty_branch_table_rejected() {
        let config = AppConfig::from_toml("", Path::new("berth.toml")).unwrap();
        assert!(matches!(
            config.catalog(Path::new(".")),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_malformed_toml() {
        let result = AppConfig::from_toml("[branches.dev", Path::new("berth.toml"));
        assert!(matches!(result, Err(Error::TomlParseFailed { .. })));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("berth.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.branches.len(), 2);
    }
}
