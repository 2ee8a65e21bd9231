//! Server setup with Tower middleware

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::routes;
use crate::state::WebhookState;

/// Run the webhook listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn run_server(
    addr: SocketAddr,
    state: WebhookState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = create_app(state);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Webhook listener ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Create the axum application with middleware
pub fn create_app(state: WebhookState) -> Router {
    routes::create_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
