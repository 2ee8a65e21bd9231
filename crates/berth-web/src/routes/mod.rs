//! Webhook routes
//!
//! ## Route Structure
//!
//! - `POST /` - Registry push notification
//! - `GET /health` - Health check endpoint

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::WebhookState;

pub mod health;
pub mod webhook;

/// Create the webhook router
///
/// ```ignore
/// use berth_web::{routes, WebhookState};
///
/// let router = routes::create_router().with_state(state);
/// ```
pub fn create_router() -> Router<WebhookState> {
    Router::new()
        .route("/", post(webhook::receive_push))
        .route("/health", get(health::health_check))
}
