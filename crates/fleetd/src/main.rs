//! Nimbus fleet daemon.
//!
//! Connects every configured database, starts the health monitor and serves
//! the administrative API until interrupted.

use std::sync::Arc;

use clap::Parser;
use nimbus_fleetd::{ServerConfig, create_app, init_logging};
use nimbus_persistence::Fleet;
use tracing::{info, warn};

/// Starts the Axum HTTP server.
async fn serve(app: axum::Router, config: &ServerConfig) -> anyhow::Result<()> {
    let addr = config.socket_addr();
    info!(address = %addr, "Server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    let fleet_config = config
        .fleet_config()
        .map_err(|e| anyhow::anyhow!("Invalid fleet configuration: {}", e))?;

    info!(
        port = config.port,
        host = %config.host,
        backends = fleet_config.backends.len(),
        auto_switch = fleet_config.auto_switch_enabled,
        "Starting Nimbus fleet daemon"
    );

    let fleet = Arc::new(Fleet::connect(fleet_config).await?);
    if fleet.get_status().is_degraded() {
        warn!("No primary backend available; writes will fail until one is switched in");
    }
    fleet.start_monitor().await;

    let app = create_app(fleet.clone(), config.clone());
    let result = serve(app, &config).await;

    fleet.stop_monitor().await;
    result
}

#[cfg(not(any(feature = "sqlite", feature = "postgres")))]
compile_error!("At least one database backend feature must be enabled");
