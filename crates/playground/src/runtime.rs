// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for the playground service.
//!
//! [`PlaygroundRuntime`] wires the state store, runtime driver and route
//! directory into an [`Orchestrator`], reconciles proxy routes and serves the
//! management API.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use playground::driver::MockDriver;
//! use playground::routes::MemoryRouteDirectory;
//! use playground::runtime::PlaygroundRuntime;
//! use playground::store::SqliteAppStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteAppStore::in_memory().await?);
//!
//!     let runtime = PlaygroundRuntime::builder()
//!         .store(store)
//!         .driver(Arc::new(MockDriver::new()))
//!         .routes(Arc::new(MemoryRouteDirectory::new()))
//!         .bind_addr("127.0.0.1:8080".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::DEFAULT_BUILD_TIMEOUT;
use crate::driver::RuntimeDriver;
use crate::handlers::PlaygroundHandlerState;
use crate::orchestrator::Orchestrator;
use crate::reconciler::Reconciler;
use crate::routes::RouteDirectory;
use crate::server;
use crate::store::AppStore;

/// Builder for a [`PlaygroundRuntime`].
pub struct PlaygroundRuntimeBuilder {
    store: Option<Arc<dyn AppStore>>,
    driver: Option<Arc<dyn RuntimeDriver>>,
    routes: Option<Arc<dyn RouteDirectory>>,
    bind_addr: SocketAddr,
    build_timeout: Duration,
    reconcile: bool,
}

impl Default for PlaygroundRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            driver: None,
            routes: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            build_timeout: DEFAULT_BUILD_TIMEOUT,
            reconcile: true,
        }
    }
}

impl PlaygroundRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the app state store (required).
    pub fn store(mut self, store: Arc<dyn AppStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the container runtime driver (required).
    pub fn driver(mut self, driver: Arc<dyn RuntimeDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Set the proxy route directory (required).
    pub fn routes(mut self, routes: Arc<dyn RouteDirectory>) -> Self {
        self.routes = Some(routes);
        self
    }

    /// Set the HTTP bind address. Port 0 picks a free port.
    ///
    /// Default: `0.0.0.0:8080`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the upper bound for one background build.
    ///
    /// Default: 30 minutes
    pub fn build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = timeout;
        self
    }

    /// Whether to replay stored apps into the route directory on start.
    ///
    /// Default: `true`
    pub fn reconcile_on_start(mut self, reconcile: bool) -> Self {
        self.reconcile = reconcile;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if a required collaborator is missing.
    pub fn build(self) -> Result<PlaygroundRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let driver = self
            .driver
            .ok_or_else(|| anyhow::anyhow!("driver is required"))?;
        let routes = self
            .routes
            .ok_or_else(|| anyhow::anyhow!("routes is required"))?;

        Ok(PlaygroundRuntimeConfig {
            store,
            driver,
            routes,
            bind_addr: self.bind_addr,
            build_timeout: self.build_timeout,
            reconcile: self.reconcile,
        })
    }
}

/// Configuration for a [`PlaygroundRuntime`].
pub struct PlaygroundRuntimeConfig {
    store: Arc<dyn AppStore>,
    driver: Arc<dyn RuntimeDriver>,
    routes: Arc<dyn RouteDirectory>,
    bind_addr: SocketAddr,
    build_timeout: Duration,
    reconcile: bool,
}

impl PlaygroundRuntimeConfig {
    /// Reconcile routes, then start the HTTP server.
    pub async fn start(self) -> Result<PlaygroundRuntime> {
        if self.reconcile {
            let reconciler = Reconciler::new(self.store.clone(), self.routes.clone());
            match reconciler.run().await {
                Ok(report) => info!(
                    synced = report.synced,
                    failed = report.failed,
                    "Startup reconciliation finished"
                ),
                Err(e) => warn!(error = %e, "Startup reconciliation failed"),
            }
        }

        let orchestrator = Orchestrator::new(self.store, self.driver, self.routes)
            .with_build_timeout(self.build_timeout);
        let state = Arc::new(PlaygroundHandlerState::new(orchestrator));

        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server_handle = tokio::spawn(server::serve(listener, state.clone(), async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        }));

        info!(
            bind_addr = %local_addr,
            build_timeout_secs = self.build_timeout.as_secs(),
            "PlaygroundRuntime started"
        );

        Ok(PlaygroundRuntime {
            server_handle,
            shutdown_tx,
            state,
            local_addr,
        })
    }
}

/// A running playground service.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination. Background
/// builds are detached and are not awaited.
pub struct PlaygroundRuntime {
    server_handle: JoinHandle<Result<()>>,
    shutdown_tx: watch::Sender<bool>,
    state: Arc<PlaygroundHandlerState>,
    local_addr: SocketAddr,
}

impl PlaygroundRuntime {
    pub fn builder() -> PlaygroundRuntimeBuilder {
        PlaygroundRuntimeBuilder::new()
    }

    /// Address the HTTP server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared handler state.
    pub fn state(&self) -> &Arc<PlaygroundHandlerState> {
        &self.state
    }

    /// The orchestrator serving requests.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.state.orchestrator
    }

    /// Whether the HTTP server task is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished()
    }

    /// Stop accepting requests and wait for in-flight ones to finish.
    pub async fn shutdown(self) -> Result<()> {
        info!("PlaygroundRuntime shutting down...");
        let _ = self.shutdown_tx.send(true);

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("PlaygroundRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("PlaygroundRuntime server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("PlaygroundRuntime server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }
}
