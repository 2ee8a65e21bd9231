//! Shared router state and the hand-off point for accepted pushes.

use std::sync::Arc;

/// Receives the tag of every accepted push.
///
/// Called from the request handler; implementations must hand the work
/// off (e.g. `tokio::spawn`) and return immediately so the registry gets
/// its response without waiting for the pull.
pub trait PushSink: Send + Sync {
    fn push(&self, tag: &str);
}

/// State shared by the webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    /// Repository name notifications must carry.
    pub repository: Arc<str>,
    /// Pusher identity notifications must carry.
    pub trusted_pusher: Arc<str>,
    pub sink: Arc<dyn PushSink>,
}

impl WebhookState {
    pub fn new(
        repository: impl Into<Arc<str>>,
        trusted_pusher: impl Into<Arc<str>>,
        sink: Arc<dyn PushSink>,
    ) -> Self {
        Self {
            repository: repository.into(),
            trusted_pusher: trusted_pusher.into(),
            sink,
        }
    }
}
