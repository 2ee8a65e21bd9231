//! Berth webhook listener.
//!
//! Accepts registry push notifications, checks the repository and the
//! pusher, answers at once and hands the pushed tag to a [`PushSink`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod error;
pub mod routes;
pub mod server;
pub mod state;

pub use error::{AppError, ErrorResponse, Result};
pub use routes::webhook::{PushData, PushNotification, Repository};
pub use server::{create_app, run_server};
pub use state::{PushSink, WebhookState};
