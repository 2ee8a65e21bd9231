//! # Berth daemon
//!
//! ## Startup
//!
//! 1. **Environment** - `.env` is loaded into the process environment
//! 2. **Configuration** - the branch file is parsed and frozen into a catalog
//! 3. **Engine** - the local Docker engine is connected and pinged
//! 4. **Trigger** - either the webhook listener (after an initial pull of
//!    every branch) or the local poll loop
//!
//! ## Shutdown
//!
//! Ctrl+C or SIGTERM stops the listener or the poll loop after the current
//! reconciliation pass.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use anyhow::Result;
use berth::cli::{Cli, LogLevel, normalize_args};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse_from(normalize_args(std::env::args_os()));

    init_tracing(cli.logs);
    info!(version = env!("CARGO_PKG_VERSION"), "Berth starting...");

    berth::app::run(cli).await
}

/// `RUST_LOG` wins over `--logs` when set.
fn init_tracing(level: LogLevel) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive())))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
