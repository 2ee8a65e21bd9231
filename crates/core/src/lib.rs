//! Core types for Berth: deployment branches, the immutable config catalog,
//! configuration loading, and the shared error type.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod branch;
pub mod catalog;
pub mod config;
pub mod env_file;
pub mod error;
pub mod result;

pub use branch::{
    Branch, BranchBuilder, DEFAULT_FAILURE_MARKER, DEFAULT_READINESS_TIMEOUT, LimitsOverride,
    PortBinding, PortBindingSpec, ResourceLimits, RestartPolicy,
};
pub use catalog::{ConfigCatalog, TagMatch};
pub use config::{AppConfig, BranchConfig, PollConfig, RegistryConfig, RegistryCredentials, WebhookConfig};
pub use error::Error;
pub use result::{LoggedResultExt, Result};
