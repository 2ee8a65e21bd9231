//! Wiring of the daemon: configuration, engine, reconciler and the chosen
//! trigger (webhook listener or local poll loop).

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use berth_core::{AppConfig, ConfigCatalog};
use berth_reconciler::{
    DockerEngine, Engine, LoopConfig, PollLoop, PullDriver, PullOutcome, Reconciler,
    ReconcilerBuilder,
};
use berth_web::{PushSink, WebhookState, run_server};
use tokio::signal;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cli::Cli;

/// Hands each accepted push to a [`PullDriver`] on its own task.
pub struct PullSink {
    driver: Arc<PullDriver>,
}

impl PullSink {
    pub fn new(driver: Arc<PullDriver>) -> Self {
        Self { driver }
    }

    /// Spawn the pull for `tag` and return its task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, tag: &str) -> JoinHandle<()> {
        let driver = Arc::clone(&self.driver);
        let tag = tag.to_string();
        tokio::spawn(async move {
            match driver.pull(&tag).await {
                Ok(PullOutcome::UpToDate) => info!(tag = %tag, "Image already up to date"),
                Ok(PullOutcome::Converged(result)) => info!(
                    tag = %tag,
                    actions_taken = result.actions_taken.len(),
                    actions_failed = result.actions_failed.len(),
                    settled = result.all_succeeded(),
                    "Pull handled"
                ),
                Err(e) if e.is_fatal() => {
                    error!(tag = %tag, error = %e, "Engine broke the pull protocol");
                }
                Err(e) => warn!(tag = %tag, error = %e, "Pull failed"),
            }
        })
    }
}

impl PushSink for PullSink {
    fn push(&self, tag: &str) {
        drop(self.dispatch(tag));
    }
}

/// Everything both modes share.
struct Daemon {
    config: AppConfig,
    reconciler: Arc<Mutex<Reconciler>>,
    driver: Arc<PullDriver>,
}

/// Load the configuration and connect to the engine, then run the mode the
/// CLI asked for until shutdown.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the engine cannot be
/// reached, the initial pass fails or the listener cannot be bound.
pub async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let base_dir = cli.config.parent().unwrap_or_else(|| Path::new("."));
    let catalog = Arc::new(
        config
            .catalog(base_dir)
            .context("Invalid branch configuration")?,
    );
    info!(branches = catalog.branches().len(), "Configuration loaded");

    let engine: Arc<dyn Engine> = Arc::new(
        DockerEngine::connect()
            .await
            .context("Cannot reach the container engine")?,
    );

    let daemon = assemble(engine, catalog, config, cli.force_recreate)?;

    if cli.local {
        run_local(daemon, cli.pull).await
    } else {
        run_webhook(daemon, cli.bind).await
    }
}

fn assemble(
    engine: Arc<dyn Engine>,
    catalog: Arc<ConfigCatalog>,
    config: AppConfig,
    force_recreate: bool,
) -> Result<Daemon> {
    let reconciler = ReconcilerBuilder::new()
        .with_engine(Arc::clone(&engine))
        .with_catalog(Arc::clone(&catalog))
        .force_recreate(force_recreate)
        .build()
        .context("Failed to build reconciler")?;
    let reconciler = Arc::new(Mutex::new(reconciler));

    let driver = Arc::new(PullDriver::new(
        engine,
        catalog,
        config.credentials(),
        Arc::clone(&reconciler),
    ));

    Ok(Daemon {
        config,
        reconciler,
        driver,
    })
}

async fn run_webhook(daemon: Daemon, bind: Option<SocketAddr>) -> Result<()> {
    let addr = match bind {
        Some(addr) => addr,
        None => daemon
            .config
            .webhook
            .bind_address
            .parse()
            .with_context(|| {
                format!(
                    "Invalid webhook bind address {}",
                    daemon.config.webhook.bind_address
                )
            })?,
    };

    daemon
        .driver
        .initialize()
        .await
        .context("Initial discovery failed")?;

    let state = WebhookState::new(
        daemon.config.webhook.repository.as_str(),
        daemon.config.trusted_pusher(),
        Arc::new(PullSink::new(Arc::clone(&daemon.driver))),
    );

    info!(%addr, repository = %daemon.config.webhook.repository, "Berth is running in webhook mode. Press Ctrl+C to stop.");
    run_server(addr, state, wait_for_shutdown())
        .await
        .context("Webhook listener failed")?;

    info!("Berth stopped gracefully");
    Ok(())
}

async fn run_local(daemon: Daemon, pull: bool) -> Result<()> {
    if pull {
        daemon
            .driver
            .initialize()
            .await
            .context("Initial pull failed")?;
    }

    let poll = &daemon.config.poll;
    let loop_config = LoopConfig {
        initial_delay: poll.initial_delay(),
        step: poll.step(),
        max_delay: poll.max_delay(),
        force_first: false,
    };

    let (mut poll_loop, stopper) = PollLoop::new(daemon.reconciler, loop_config);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        stopper.stop();
    });

    info!("Berth is running in local mode. Press Ctrl+C to stop.");
    poll_loop.run().await;

    info!("Berth stopped gracefully");
    Ok(())
}

/// Resolve on Ctrl+C, or on SIGTERM where the platform has it.
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
            Err(err) => error!("Failed to listen for shutdown signal: {}", err),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
