// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for playground integration tests.
//!
//! Provides TestContext, an orchestrator over an in-memory SQLite store, the
//! mock driver and the in-memory route directory.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use playground::app::{App, AppId, AppRequest, AppStatus};
use playground::driver::MockDriver;
use playground::orchestrator::Orchestrator;
use playground::routes::{MemoryRouteDirectory, RouteDirectory};
use playground::store::{AppStore, SqliteAppStore};

/// Orchestrator and the collaborators behind it.
pub struct TestContext {
    pub store: Arc<SqliteAppStore>,
    pub driver: Arc<MockDriver>,
    pub routes: Arc<MemoryRouteDirectory>,
    pub orchestrator: Orchestrator,
}

impl TestContext {
    /// Context with well-behaved collaborators.
    pub async fn new() -> Self {
        Self::with(MockDriver::new(), MemoryRouteDirectory::new()).await
    }

    /// Context with the given driver and route directory.
    pub async fn with(driver: MockDriver, routes: MemoryRouteDirectory) -> Self {
        let store = Arc::new(
            SqliteAppStore::in_memory()
                .await
                .expect("Failed to open in-memory store"),
        );
        let driver = Arc::new(driver);
        let routes = Arc::new(routes);
        let orchestrator = Orchestrator::new(store.clone(), driver.clone(), routes.clone());

        Self {
            store,
            driver,
            routes,
            orchestrator,
        }
    }

    /// Replace the orchestrator's build timeout.
    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.orchestrator = self.orchestrator.with_build_timeout(timeout);
        self
    }

    /// Rebuild the orchestrator over a different route directory.
    pub fn with_routes(mut self, routes: Arc<dyn RouteDirectory>) -> Self {
        self.orchestrator = Orchestrator::new(self.store.clone(), self.driver.clone(), routes);
        self
    }

    /// Stored record, without container status.
    pub async fn stored(&self, id: AppId) -> Option<App> {
        self.store.get_app(id).await.expect("Failed to read app")
    }

    /// Poll the store until the app reaches `status`.
    pub async fn wait_for_status(&self, id: AppId, status: AppStatus) -> App {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(app) = self.stored(id).await
                && app.status == status
            {
                return app;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "app {} never reached status {}",
                id,
                status
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// A valid request for an app named `name`.
pub fn demo_request(name: &str) -> AppRequest {
    AppRequest {
        app_name: name.to_string(),
        username: "u".to_string(),
        user_home_directory: "/home/u".to_string(),
        dockerfile: Some("FROM alpine".to_string()),
        docker_image: None,
        port: 8080,
        optional_features: vec![],
        caddy_config: "reverse_proxy {{.ContainerName}}:{{.Port}}".to_string(),
    }
}

/// JSON body for [`demo_request`].
pub fn demo_body(name: &str) -> serde_json::Value {
    serde_json::json!({
        "app_name": name,
        "username": "u",
        "user_home_directory": "/home/u",
        "dockerfile": "FROM alpine",
        "port": 8080,
        "optional_features": [],
        "caddy_config": "reverse_proxy {{.ContainerName}}:{{.Port}}"
    })
}
