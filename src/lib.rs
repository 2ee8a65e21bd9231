#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Berth
//!
//! Keeps a host's containers in step with the images pushed to a registry.
//!
//! The binary wires [`berth_core`], [`berth_reconciler`] and [`berth_web`]
//! together; this library exposes that wiring for tests.

pub mod app;
pub mod cli;

pub use berth_core;
pub use berth_reconciler;
pub use berth_web;
