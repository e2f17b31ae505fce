//! Peergate daemon entry point.

use std::sync::Arc;

use log::{error, info};
use tokio::signal;

mod auth;
mod config;
mod deploy;
mod error;
mod registry;
mod reload;
mod rename;
mod server;
mod store;
mod types;
mod validate;

use auth::AuthStrategy;
use config::{AuthConfig, Config};
use deploy::DeploymentOrchestrator;
use registry::PeerRegistry;
use reload::SystemctlReloader;
use server::{run_http_server, AppState};
use store::GitStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting peergate with config: {:?}", cfg);

    // Single working copy, shared behind one lock
    let store = store::shared(GitStore::new(
        cfg.peers_dir.clone(),
        cfg.remote.clone(),
        cfg.review_branch.clone(),
        cfg.production_branch.clone(),
    ));

    let registry = PeerRegistry::new(store.clone(), cfg.rename_verification.verifier());

    let reloader = SystemctlReloader::new(cfg.reload_command.clone(), cfg.reload_unit());
    let deploy = DeploymentOrchestrator::new(store, Box::new(reloader), cfg.success_state.clone());

    let auth_config: &AuthConfig = cfg
        .auth
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("no deploy authentication configured"))?;
    let auth = AuthStrategy::from_config(auth_config)?;

    let state = AppState {
        registry: Arc::new(registry),
        auth: Arc::new(auth),
        deploy: Arc::new(deploy),
        site: cfg.site.clone(),
        production_branch: cfg.production_branch.clone(),
    };

    // Graceful Shutdown
    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(err) => {
                error!("Unable to listen for shutdown signal: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    if let Err(e) = run_http_server(cfg.listen, state, shutdown).await {
        error!("HTTP server failed: {}", e);
        return Err(e);
    }

    info!("Shutdown complete.");
    Ok(())
}
