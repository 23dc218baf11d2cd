//! Re-entry server: `conductor serve`.

use anyhow::Result;
use std::sync::Arc;

use conductor::config::ConductorConfig;
use conductor::handler::HandlerRegistry;
use conductor::server::start_server;
use conductor::tick::TickController;

use super::open_capabilities;

pub async fn cmd_serve(config: &ConductorConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut server = config.server.clone();
    if let Some(host) = host {
        server.host = host;
    }
    if let Some(port) = port {
        server.port = port;
    }

    let caps = open_capabilities(config)?;
    if caps.credentials.reentry_token.is_none() {
        tracing::warn!("CONDUCTOR_REENTRY_TOKEN is not set; /internal/tick will refuse every request");
    }
    let controller = Arc::new(TickController::new(caps, HandlerRegistry::dry_run()));
    start_server(controller, &server).await
}
