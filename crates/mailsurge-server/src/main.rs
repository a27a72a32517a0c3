//! Mailsurge - campaign engine entry point

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use mailsurge_api::AppState;
use mailsurge_common::config::Config;
use mailsurge_core::{Registry, TransportCache};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_logging(&config.logging.level);

    info!("Starting Mailsurge campaign engine...");

    let transports = Arc::new(TransportCache::new());
    let registry = Registry::new(config.engine.clone(), transports);
    let gc_handle = registry.spawn_gc();

    let state = AppState::new(registry.clone(), config.api.environment);
    let app = mailsurge_api::create_router(state, &config.api.cors_origins);

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutdown signal received, draining campaigns...");
    gc_handle.abort();
    registry.shutdown().await;
    info!("Mailsurge shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},mailsurge=debug")));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(filter)
        .init();
}
