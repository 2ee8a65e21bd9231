//! Command-line parsing tests.

#![allow(clippy::unwrap_used)]

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;

use berth::cli::{Cli, LogLevel, normalize_args};
use clap::Parser;

#[test]
fn test_key_and_iv_are_required() {
    assert!(Cli::try_parse_from(["berth"]).is_err());
    assert!(Cli::try_parse_from(["berth", "--key", "k"]).is_err());
    assert!(Cli::try_parse_from(["berth", "--iv", "v"]).is_err());
}

#[test]
fn test_empty_key_is_rejected() {
    assert!(Cli::try_parse_from(["berth", "--key", "", "--iv", "v"]).is_err());
    assert!(Cli::try_parse_from(["berth", "--key", "k", "--iv", "  "]).is_err());
}

#[test]
fn test_defaults_select_webhook_mode() {
    let cli = Cli::try_parse_from(["berth", "--key", "k", "--iv", "v"]).unwrap();

    assert!(!cli.local);
    assert!(!cli.pull);
    assert!(!cli.force_recreate);
    assert_eq!(cli.logs, LogLevel::Log);
    assert_eq!(cli.config, PathBuf::from("berth.toml"));
    assert_eq!(cli.bind, None);
}

#[test]
fn test_local_mode_with_initial_pull() {
    let cli = Cli::try_parse_from(["berth", "--key", "k", "--iv", "v", "-l", "-p"]).unwrap();

    assert!(cli.local);
    assert!(cli.pull);
}

#[test]
fn test_overrides_are_parsed() {
    let cli = Cli::try_parse_from([
        "berth",
        "--key",
        "k",
        "--iv",
        "v",
        "--logs",
        "debug",
        "--config",
        "/etc/berth/berth.toml",
        "--bind",
        "127.0.0.1:9000",
        "--force-recreate",
    ])
    .unwrap();

    assert_eq!(cli.logs, LogLevel::Debug);
    assert_eq!(cli.config, PathBuf::from("/etc/berth/berth.toml"));
    assert_eq!(cli.bind, Some("127.0.0.1:9000".parse::<SocketAddr>().unwrap()));
    assert!(cli.force_recreate);
}

#[test]
fn test_unknown_log_level_is_rejected() {
    assert!(Cli::try_parse_from(["berth", "--key", "k", "--iv", "v", "--logs", "trace"]).is_err());
}

#[test]
fn test_log_levels_map_to_tracing_directives() {
    assert_eq!(LogLevel::Debug.directive(), "debug");
    assert_eq!(LogLevel::Log.directive(), "info");
    assert_eq!(LogLevel::Error.directive(), "error");
}

fn os_args(args: &[&str]) -> Vec<OsString> {
    args.iter().map(OsString::from).collect()
}

#[test]
fn test_single_dash_key_and_iv_are_accepted() {
    let args = normalize_args(os_args(&["berth", "-key", "k", "-iv=v", "-l"]));
    assert_eq!(args, os_args(&["berth", "--key", "k", "--iv=v", "-l"]));

    let cli = Cli::try_parse_from(args).unwrap();
    assert_eq!(cli.key, "k");
    assert_eq!(cli.iv, "v");
    assert!(cli.local);
}

#[test]
fn test_normalize_only_touches_exact_legacy_flags() {
    let args = os_args(&["berth", "-ivy", "-keyring", "--key", "k", "-p"]);
    assert_eq!(normalize_args(args.clone()), args);
}
