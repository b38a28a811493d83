// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Startup route reconciliation.
//!
//! The proxy keeps its route table in memory only, so after a restart it
//! knows nothing about the apps in the store. The reconciler resets the proxy
//! to its default routes and replays every app into it, once, before the
//! HTTP server starts taking requests.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::app::AppStatus;
use crate::error::Result;
use crate::routes::{RouteDirectory, RouteSpec};
use crate::store::AppStore;

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Apps whose route was installed
    pub synced: usize,
    /// Apps whose route could not be installed
    pub failed: usize,
}

/// Replays stored apps into the route directory.
pub struct Reconciler {
    store: Arc<dyn AppStore>,
    routes: Arc<dyn RouteDirectory>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn AppStore>, routes: Arc<dyn RouteDirectory>) -> Self {
        Self { store, routes }
    }

    /// Reset the route directory and install a route for every stored app.
    ///
    /// Apps are processed in id order. A failed app is marked `failed` and the
    /// pass continues; each success marks the app `active`. Only a failure to
    /// reset the directory or to list the apps aborts the pass.
    pub async fn run(&self) -> Result<ReconcileReport> {
        info!(directory = self.routes.directory_type(), "Reconciling proxy routes");
        self.routes.reset_to_default().await?;

        let mut apps = self.store.list_apps().await?;
        apps.sort_by_key(|app| app.id);

        let mut report = ReconcileReport::default();
        for app in &apps {
            let status = match self.routes.add_route(&RouteSpec::for_app(app)).await {
                Ok(()) => {
                    report.synced += 1;
                    AppStatus::Active
                }
                Err(e) => {
                    warn!(app_id = app.id, app_name = %app.app_name, error = %e, "Failed to sync route");
                    report.failed += 1;
                    AppStatus::Failed
                }
            };

            if let Err(e) = self.store.update_status(app.id, status).await {
                error!(app_id = app.id, status = %status, error = %e, "Failed to record reconciled status");
            }
        }

        info!(
            synced = report.synced,
            failed = report.failed,
            "Route reconciliation complete"
        );
        Ok(report)
    }
}
