//! CLI definitions using clap.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;

use berth_core::config::DEFAULT_CONFIG_PATH;
use clap::{Parser, ValueEnum};

/// Berth - keeps a host's containers in step with pushed images
#[derive(Parser, Debug)]
#[command(name = "berth")]
#[command(version)]
#[command(about = "Keeps a host's containers in step with the images pushed to a registry")]
#[command(
    long_about = "Berth listens for registry push notifications (or polls the local engine), pulls the pushed image and replaces every container built from an older one, keeping new containers only once they report ready.\n\nThe single-dash spellings `-key` and `-iv` of older deployments are accepted as `--key` and `--iv`."
)]
pub struct Cli {
    /// Key for the encrypted env files (`-key` is accepted too)
    #[arg(long, value_parser = non_empty)]
    pub key: String,

    /// Initialisation vector for the encrypted env files (`-iv` is accepted too)
    #[arg(long, value_parser = non_empty)]
    pub iv: String,

    /// Poll the local engine instead of listening for webhooks
    #[arg(short, long, default_value_t = false)]
    pub local: bool,

    /// Pull every branch's image before polling (local mode only)
    #[arg(short, long, default_value_t = false)]
    pub pull: bool,

    /// Log verbosity
    #[arg(long, value_enum, default_value_t = LogLevel::Log)]
    pub logs: LogLevel,

    /// Path to the branch configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override the webhook bind address from the config file
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Recreate containers even when they already run the newest image
    #[arg(long, default_value_t = false)]
    pub force_recreate: bool,
}

/// Verbosity accepted by `--logs`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Log,
    Error,
}

impl LogLevel {
    /// The tracing filter directive for this level.
    pub const fn directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Log => "info",
            Self::Error => "error",
        }
    }
}

fn non_empty(value: &str) -> Result<String, String> {
    if value.trim().is_empty() {
        Err("must not be empty".to_string())
    } else {
        Ok(value.to_string())
    }
}

/// Single-dash long flags still used by existing deployments.
const LEGACY_FLAGS: [(&str, &str); 2] = [("-key", "--key"), ("-iv", "--iv")];

/// Rewrite `-key` / `-iv` (also in `-key=value` form) to their double-dash
/// spelling; every other argument passes through untouched.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let Some(text) = arg.to_str() else {
                return arg;
            };
            LEGACY_FLAGS
                .iter()
                .find_map(|(legacy, flag)| {
                    if text == *legacy {
                        Some(OsString::from(*flag))
                    } else {
                        text.strip_prefix(legacy)
                            .and_then(|rest| rest.strip_prefix('='))
                            .map(|value| OsString::from(format!("{flag}={value}")))
                    }
                })
                .unwrap_or(arg)
        })
        .collect()
}
