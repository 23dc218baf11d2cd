//! Re-entry endpoint and read-only job inspection over HTTP.
//!
//! | Route                 | Purpose                                          |
//! |-----------------------|--------------------------------------------------|
//! | `POST /internal/tick` | Bearer-authenticated continuation target         |
//! | `GET /jobs/{id}`      | Job record plus frontier counts                  |
//! | `GET /health`         | Liveness                                         |

pub mod api;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::tick::TickController;

pub use api::{AppState, SharedState};

/// Build the full application router with request tracing.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve until Ctrl+C.
pub async fn start_server(controller: Arc<TickController>, config: &ServerConfig) -> Result<()> {
    let state = Arc::new(AppState { controller });
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "conductor listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
