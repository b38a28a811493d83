// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Playground - App Lifecycle Control Plane
//!
//! Serves the `/_app` management API:
//! - App records in PostgreSQL
//! - Devcontainer builds through the docker and devcontainer CLIs
//! - Per-app routes in Caddy

use std::sync::Arc;
use tracing::{info, warn};

use playground::config::Config;
use playground::driver::RuntimeDriver;
use playground::driver::docker::{DockerDriver, DockerDriverConfig};
use playground::routes::{CaddyConfig, CaddyRouteDirectory, RouteDirectory};
use playground::runtime::PlaygroundRuntime;
use playground::store::PostgresAppStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "playground=info,tower_http=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        caddy_admin_url = %config.caddy_admin_url,
        apps_base_dir = %config.apps_base_dir.display(),
        "Starting playground"
    );

    // Connect to database
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect_with(config.database.clone())
        .await?;

    info!("Connected to database");

    let store = Arc::new(PostgresAppStore::new(pool));
    store.migrate().await?;

    info!("Database schema verified");

    tokio::fs::create_dir_all(&config.apps_base_dir).await?;

    // Container runtime is required
    let driver = Arc::new(DockerDriver::new(DockerDriverConfig::from_config(&config)));
    driver.health_check().await?;
    info!(driver_type = driver.driver_type(), "Runtime driver initialized");

    // Proxy may come up after us; reconciliation reports per-app failures
    let routes = Arc::new(CaddyRouteDirectory::new(CaddyConfig {
        admin_url: config.caddy_admin_url.clone(),
        host_upstream: config.host_container.clone(),
        ..Default::default()
    })?);
    if let Err(e) = routes.health_check().await {
        warn!(error = %e, "Caddy admin API not reachable");
    }

    let runtime = PlaygroundRuntime::builder()
        .store(store)
        .driver(driver)
        .routes(routes)
        .bind_addr(config.http_addr)
        .build_timeout(config.build_timeout)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Playground server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Playground shut down");

    Ok(())
}
