//! fleet-gateway server entry point.
//!
//! Starts the change listener and the Axum HTTP server with REST and
//! WebSocket endpoints. Exits non-zero if the change listener fails.

use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use fleet_gateway::config::FleetConfig;
use fleet_gateway::persistence::{MemoryStore, PostgresStore, SnapshotStore};
use fleet_gateway::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = FleetConfig::from_env().context("invalid LISTEN_ADDR")?;
    tracing::info!(addr = %config.listen_addr, "starting fleet-gateway");

    // Build persistence layer
    let store: Arc<dyn SnapshotStore> = if config.persistence_enabled {
        let store = PostgresStore::connect(&config)
            .await
            .context("failed to connect to PostgreSQL")?;
        tracing::info!("connected to PostgreSQL");
        Arc::new(store)
    } else {
        tracing::warn!("persistence disabled; using in-memory store");
        Arc::new(MemoryStore::new(config.notify_channel.clone()))
    };

    // Build live-sync core and router
    let (app_state, listener) = server::assemble(store, &config.notify_channel);
    let app = server::build_app(app_state);

    let listener_task = tokio::spawn(listener.run());

    // Start server
    let tcp = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    tokio::select! {
        served = axum::serve(tcp, app).into_future() => {
            served.context("http server failed")?;
        }
        outcome = listener_task => {
            let err = match outcome {
                Ok(Err(err)) => anyhow::Error::new(err),
                Ok(Ok(())) => anyhow::anyhow!("change listener stopped"),
                Err(join) => anyhow::Error::new(join),
            };
            tracing::error!(error = %err, "live updates stopped; shutting down");
            return Err(err.context("change listener failed"));
        }
    }

    Ok(())
}
