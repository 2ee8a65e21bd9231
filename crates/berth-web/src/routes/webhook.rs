//! Registry push notifications: POST /

use axum::{body::Bytes, extract::State, http::StatusCode};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::state::WebhookState;

/// The parts of a registry push notification this service reads.
#[derive(Debug, Clone, Deserialize)]
pub struct PushNotification {
    pub repository: Repository,
    #[serde(default)]
    pub push_data: Option<PushData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushData {
    pub tag: String,
    pub pusher: String,
}

/// Check a notification against the configured repository and pusher;
/// returns the pushed tag.
///
/// # Errors
///
/// - [`AppError::NotFound`] for another repository
/// - [`AppError::BadRequest`] when push data is missing
/// - [`AppError::UntrustedPusher`] for any other pusher
pub fn accept(notification: PushNotification, state: &WebhookState) -> Result<String> {
    if notification.repository.name != *state.repository {
        return Err(AppError::NotFound(format!(
            "repository '{}' is not deployed here",
            notification.repository.name
        )));
    }

    let push = notification
        .push_data
        .ok_or_else(|| AppError::BadRequest("missing push_data".to_string()))?;

    if push.pusher != *state.trusted_pusher {
        return Err(AppError::UntrustedPusher(push.pusher));
    }

    Ok(push.tag)
}

/// POST / - accept a push and start pulling its tag in the background
pub async fn receive_push(State(state): State<WebhookState>, body: Bytes) -> Result<StatusCode> {
    let notification: PushNotification = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let tag = accept(notification, &state).inspect_err(|e| {
        warn!(error = %e, "Rejected push notification");
    })?;

    info!(tag = %tag, "Push accepted");
    state.sink.push(&tag);
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::state::PushSink;

    struct Discard;

    impl PushSink for Discard {
        fn push(&self, _tag: &str) {}
    }

    fn state() -> WebhookState {
        WebhookState::new("lgd", "alice", Arc::new(Discard))
    }

    fn notification(repository: &str, pusher: &str) -> PushNotification {
        PushNotification {
            repository: Repository {
                name: repository.to_string(),
            },
            push_data: Some(PushData {
                tag: "latest-dev".to_string(),
                pusher: pusher.to_string(),
            }),
        }
    }

    #[test]
    fn test_accept_returns_tag() {
        let tag = accept(notification("lgd", "alice"), &state());
        assert_eq!(tag.ok().as_deref(), Some("latest-dev"));
    }

    #[test]
    fn test_repository_checked_before_pusher() {
        let result = accept(notification("wrong", "mallory"), &state());
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_untrusted_pusher_rejected() {
        let result = accept(notification("lgd", "mallory"), &state());
        assert!(matches!(result, Err(AppError::UntrustedPusher(p)) if p == "mallory"));
    }

    #[test]
    fn test_missing_push_data_is_bad_request() {
        let mut body = notification("lgd", "alice");
        body.push_data = None;
        assert!(matches!(accept(body, &state()), Err(AppError::BadRequest(_))));
    }
}
