//! Reconciliation of a host's containers against pushed images.
//!
//! Every cycle rediscovers the engine's state and acts on it:
//!
//! - **Discover**: list containers (removing exited ones), then images,
//!   keeping only the newest image per repo tag
//! - **Purge**: remove or recreate containers whose image or branch went stale
//! - **Converge**: create every container a branch wants but lacks
//!
//! New containers start under generous build limits and are only kept once
//! their log stream shows the branch's readiness marker; they are then
//! promoted to production limits.
//!
//! # Triggers
//!
//! - [`PullDriver::pull`] - a registry push for one tag
//! - [`PollLoop`] - polling when no webhook delivery is available
//!
//! Both share one [`Reconciler`] behind a `tokio::sync::Mutex`, so
//! reconciliation passes never interleave.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use berth_reconciler::{DockerEngine, LoopConfig, PollLoop, Reconciler, ReconcilerConfig};
//! use tokio::sync::Mutex;
//!
//! let engine = Arc::new(DockerEngine::connect().await?);
//! let reconciler = Reconciler::new(engine, catalog, ReconcilerConfig::default());
//! let (mut poll, stopper) = PollLoop::new(Arc::new(Mutex::new(reconciler)), LoopConfig::default());
//! poll.run().await;
//! ```
//!
//! # Limitations
//!
//! State is read fresh from the engine and then acted on; a pass is only
//! correct if nothing else mutates the engine while it runs.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod containers;
pub mod docker;
pub mod engine;
pub mod error;
pub mod images;
pub mod lifecycle;
pub mod r#loop;
pub mod memory;
pub mod pull;
pub mod reconciler;
pub mod types;

// Re-export main types
pub use containers::ContainerRegistry;
pub use docker::DockerEngine;
pub use engine::{
    ContainerRecord, ContainerState, CreateContainerRequest, Engine, ImageRecord, LogStream,
    PullEvent, PullStream,
};
pub use error::{Error, Result};
pub use images::ImageCatalog;
pub use lifecycle::{ContainerLifecycle, CreateOutcome, Readiness};
pub use r#loop::{Backoff, LoopConfig, LoopStopper, PollLoop};
pub use memory::{EngineCall, InMemoryEngine, LogScript};
pub use pull::{PullDriver, PullOutcome, PullProgress};
pub use reconciler::{Reconciler, ReconcilerBuilder, ReconcilerConfig};
pub use types::{ReconcileAction, ReconcileResult, RemovalReason};
