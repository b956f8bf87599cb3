//! rda cluster service
//!
//! Allocates compute instances to sharded clusters, drives clusters through
//! their lifecycle and serves the cluster API.

use std::sync::Arc;

use anyhow::Result;
use rda_cluster_service::{
    allocator::MaxDistribution,
    api,
    clients::{ComputeClient, RegistryClient},
    config::{self, StoreKind},
    controller::ClusterController,
    db::{MemoryStore, PgStore, Store},
    state::AppState,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to RDA_LOG_LEVEL.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting rda cluster service");
    info!(
        listen_addr = %config.listen_addr,
        store = ?config.store,
        registry_url = %config.registry_url,
        "Configuration loaded"
    );

    let store: Arc<dyn Store> = match config.store {
        StoreKind::Memory => {
            warn!("Using in-memory store, state is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreKind::Postgres => {
            let store = match PgStore::connect(&config.database).await {
                Ok(store) => {
                    info!("Database connection established");
                    store
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect to database");
                    return Err(e.into());
                }
            };

            if config.dev_mode {
                info!("Running database migrations (dev mode)");
                if let Err(e) = store.run_migrations().await {
                    error!(error = %e, "Failed to run migrations");
                    return Err(e.into());
                }
            }
            Arc::new(store)
        }
    };

    let controller = ClusterController::new(
        store.clone(),
        Arc::new(RegistryClient::new(&config.registry_url, config.http_timeout)),
        Arc::new(ComputeClient::new(config.http_timeout)),
        Arc::new(MaxDistribution),
        config.controller.clone(),
    );

    controller.load().await?;

    let state = AppState::new(store, controller);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        })
        .await?;

    info!("Cluster service shutdown complete");
    Ok(())
}
