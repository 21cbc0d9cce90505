//! Read-only diagnostics listener.
//!
//! Serves the current routing and health view as JSON on a separate
//! address, so it is never reachable through the proxied routes.

pub mod handlers;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::http::server::AppState;
use self::handlers::{get_status, get_targets};

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/targets", get(get_targets))
        .with_state(state)
}

/// Serve the admin router until `shutdown` fires.
pub async fn serve(listener: TcpListener, state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let addr = listener.local_addr().ok();
    tracing::info!(address = ?addr, "Admin listener starting");

    let result = axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await;

    if let Err(e) = result {
        tracing::error!(error = %e, "Admin listener failed");
    }
}
