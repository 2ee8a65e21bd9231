//! Creating one container and deciding whether it may stay.
//!
//! A new container starts with its branch's generous build limits, since
//! the app inside may still compile before it serves traffic. Its log
//! stream is then followed until a line contains the readiness marker, a
//! line contains the failure marker, the stream ends, or the branch's
//! readiness timeout elapses. Ready containers are promoted to production
//! limits; everything else is removed and left for the next cycle.

use std::sync::Arc;

use berth_core::{Branch, ConfigCatalog, LoggedResultExt, PortBindingSpec, RestartPolicy};
use futures::StreamExt;
use tracing::{info, warn};

use crate::engine::{CreateContainerRequest, Engine, LogStream};
use crate::error::{Error, Result};

/// How a readiness wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// A line contained the readiness marker.
    Ready,
    /// A line contained the failure marker.
    FailureMarker { line: String },
    /// Neither marker appeared before the timeout.
    TimedOut,
    /// The log stream ended (or broke) before any marker.
    StreamClosed,
}

impl Readiness {
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Result of [`ContainerLifecycle::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Ready and running under production limits.
    Promoted { id: String },
    /// Not ready; the container has been removed.
    TornDown { id: String, readiness: Readiness },
}

impl CreateOutcome {
    pub const fn is_promoted(&self) -> bool {
        matches!(self, Self::Promoted { .. })
    }
}

/// Creates containers and validates them against their branch's markers.
pub struct ContainerLifecycle {
    engine: Arc<dyn Engine>,
    catalog: Arc<ConfigCatalog>,
}

impl ContainerLifecycle {
    pub fn new(engine: Arc<dyn Engine>, catalog: Arc<ConfigCatalog>) -> Self {
        Self { engine, catalog }
    }

    /// Create, start and validate the container `name` from `image`.
    ///
    /// No retry happens here; a torn-down container is recreated by a
    /// later reconciliation cycle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BranchNotFound`] if no branch claims `name`, or the
    /// engine error of a failed create/start/logs/update call. A container
    /// that was created but could not be started, followed or promoted is
    /// removed before the error is returned.
    pub async fn create(
        &self,
        name: &str,
        image: &str,
        port_bindings: &PortBindingSpec,
    ) -> Result<CreateOutcome> {
        let branch = self
            .catalog
            .branch_for_container_name(name)
            .ok_or_else(|| Error::branch_not_found(name))?;

        let request = CreateContainerRequest {
            name: name.to_string(),
            image: image.to_string(),
            env: branch.env().to_vec(),
            port_bindings: port_bindings.clone(),
            volume_binds: branch.volume_binds().map(<[String]>::to_vec),
            limits: branch.build_limits().clone(),
        };

        info!(container = %name, image = %image, ports = ?port_bindings, "Creating container");
        if let Some(binds) = &request.volume_binds {
            info!(container = %name, volumes = ?binds, "Using volumes");
        }

        let id = self.engine.create_container(&request).await?;

        let logs = match self.start_and_follow(&id).await {
            Ok(logs) => logs,
            Err(e) => {
                self.discard(&id).await;
                return Err(e);
            }
        };

        let readiness = wait_for_readiness(logs, name, branch).await;

        if readiness.is_ready() {
            let limits = branch.production_limits();
            info!(
                container = %name,
                id = %id,
                cpu_quota = limits.cpu_quota,
                memory = ?limits.memory,
                restart = limits.restart_policy.map_or("unchanged", RestartPolicy::as_str),
                "Build succeeded, applying production limits"
            );
            if let Err(e) = self.engine.update_container(&id, limits).await {
                self.discard(&id).await;
                return Err(e);
            }
            Ok(CreateOutcome::Promoted { id })
        } else {
            warn!(container = %name, id = %id, readiness = ?readiness, "Build failed, removing container");
            self.discard(&id).await;
            Ok(CreateOutcome::TornDown { id, readiness })
        }
    }

    async fn start_and_follow(&self, id: &str) -> Result<LogStream> {
        self.engine.start_container(id).await?;
        self.engine.container_logs(id).await
    }

    async fn discard(&self, id: &str) {
        self.engine
            .remove_container(id)
            .await
            .ok_logged("Failed to remove container");
    }
}

/// Follow `logs` until a marker shows up, the stream ends, or the branch's
/// readiness timeout elapses.
///
/// The timeout and the scan are one future: whichever finishes first drops
/// the other, which also drops the log subscription.
pub async fn wait_for_readiness(logs: LogStream, name: &str, branch: &Branch) -> Readiness {
    let scan = scan_for_markers(logs, name, branch.readiness_marker(), branch.failure_marker());
    tokio::time::timeout(branch.readiness_timeout(), scan)
        .await
        .unwrap_or(Readiness::TimedOut)
}

async fn scan_for_markers(
    mut logs: LogStream,
    name: &str,
    ready_marker: &str,
    failure_marker: &str,
) -> Readiness {
    let mut lines = LogLines::default();

    while let Some(chunk) = logs.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(container = %name, error = %e, "Log stream broke");
                return Readiness::StreamClosed;
            }
        };

        for line in lines.push(&chunk) {
            info!(container = %name, "{line}");
            if let Some(readiness) = classify(&line, ready_marker, failure_marker) {
                return readiness;
            }
        }

        // The marker may be printed without a trailing newline.
        if lines.pending().contains(ready_marker) {
            info!(container = %name, "{}", lines.pending());
            return Readiness::Ready;
        }
    }

    lines
        .finish()
        .and_then(|line| classify(&line, ready_marker, failure_marker))
        .unwrap_or(Readiness::StreamClosed)
}

fn classify(line: &str, ready_marker: &str, failure_marker: &str) -> Option<Readiness> {
    if line.contains(ready_marker) {
        Some(Readiness::Ready)
    } else if line.contains(failure_marker) {
        Some(Readiness::FailureMarker {
            line: line.to_string(),
        })
    } else {
        None
    }
}

/// Splits raw log chunks into lines, stripping the engine's frame header.
///
/// A multiplexed log stream prefixes each frame with eight bytes: the
/// stream id (0, 1 or 2), three zero bytes, and a big-endian length.
/// Lines without such a prefix pass through unchanged.
#[derive(Debug, Default)]
pub struct LogLines {
    partial: Vec<u8>,
}

impl LogLines {
    /// Feed a chunk; returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);

        let mut complete = Vec::new();
        while let Some(end) = self.partial.iter().position(|byte| *byte == b'\n') {
            let rest = self.partial.split_off(end.saturating_add(1));
            let line = std::mem::replace(&mut self.partial, rest);
            complete.push(decode_line(&line));
        }
        complete
    }

    /// The incomplete trailing line, header stripped.
    pub fn pending(&self) -> String {
        decode_line(&self.partial)
    }

    /// Flush the incomplete trailing line, if any.
    pub fn finish(self) -> Option<String> {
        let line = decode_line(&self.partial);
        (!line.is_empty()).then_some(line)
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(strip_frame_header(raw))
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// Remove the eight-byte multiplexing header from the start of `line`.
pub fn strip_frame_header(line: &[u8]) -> &[u8] {
    match line {
        [stream, 0, 0, 0, _, _, _, _, rest @ ..] if *stream <= 2 => rest,
        _ => line,
    }
}
