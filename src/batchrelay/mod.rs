pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod net;
pub mod reaper;
pub mod registry;
pub mod subscriptions;
pub mod types;

use std::io;

use log::{error, warn};

use config::ServerConfig;
use net::server::{run_server, AppState};
use reaper::start_reaper_task;

/// Starts the relay and serves until CTRL+C
pub async fn init(config: ServerConfig) -> io::Result<()> {
    let addr = config.addr.clone();
    let state = AppState::from_config(config)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    if let Some(ttl) = state.config.subscription_ttl() {
        start_reaper_task(state.handler.clone(), ttl, state.config.reap_interval());
    }

    let handler = state.handler.clone();
    run_server(&addr, state, async move {
        shutdown_signal().await;
        handler.shutdown();
    })
    .await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("CTRL+C received, shutting down"),
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await
        }
    }
}
