// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle orchestrator.
//!
//! Drives apps through build, route and status transitions by composing the
//! [`AppStore`], [`RuntimeDriver`] and [`RouteDirectory`].
//!
//! Create, update and start-from-missing return as soon as the record is
//! written; the build runs in a detached task whose [`JoinHandle`] callers may
//! drop. The task owns its cleanup: it writes the final status and releases
//! its [`BuildLease`] on every exit path.
//!
//! Within one build the order is always build, run, route, then `active`.
//! A build that loses its lease (superseded by a newer build, or its app was
//! deleted) stops at its next runtime call and writes no status.
//!
//! Route mutations from builds and deletes are serialized through one gate. A
//! build only installs its route while holding the gate and still owning its
//! lease, so a deleted app or a superseded build never lands a route after
//! the teardown or the newer install.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::{App, AppId, AppRequest, AppStatus, ContainerStatus};
use crate::build_coordinator::{BuildCoordinator, BuildLease};
use crate::config::DEFAULT_BUILD_TIMEOUT;
use crate::driver::{BuildSpec, DriverError, RuntimeDriver};
use crate::error::{Error, Result};
use crate::routes::{RouteDirectory, RouteSpec};
use crate::store::AppStore;

/// Why a build ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Build recipe could not be rendered
    Render(String),
    /// Image build or container start failed
    Build(String),
    /// Proxy route could not be installed
    Route(String),
    /// Build exceeded its time limit
    TimedOut,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Render(e) => write!(f, "render failed: {}", e),
            FailureCause::Build(e) => write!(f, "build failed: {}", e),
            FailureCause::Route(e) => write!(f, "route sync failed: {}", e),
            FailureCause::TimedOut => f.write_str("build timed out"),
        }
    }
}

/// How a background build ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Container running and route in place; status set to `active`
    Active,
    /// Status set to `failed`
    Failed(FailureCause),
    /// Lease lost to a newer build or a delete; status untouched
    Superseded,
}

/// A freshly written record and the build working on it.
#[derive(Debug)]
pub struct Provisioning {
    /// Record as persisted, status `pending`
    pub app: App,
    /// Background build; may be dropped
    pub task: JoinHandle<BuildOutcome>,
}

/// Result of a start request.
#[derive(Debug)]
pub enum StartOutcome {
    /// Container was missing; a full build is running
    Creating(JoinHandle<BuildOutcome>),
    /// Container was already running
    AlreadyRunning,
    /// Existing container started
    Started,
}

#[derive(Debug, PartialEq, Eq)]
enum RouteSync {
    Install,
    Rename { previous_name: String },
    Skip,
}

/// App lifecycle orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn AppStore>,
    driver: Arc<dyn RuntimeDriver>,
    routes: Arc<dyn RouteDirectory>,
    builds: Arc<BuildCoordinator>,
    route_gate: Arc<Mutex<()>>,
    build_timeout: Duration,
}

impl Orchestrator {
    /// Create an orchestrator over the three collaborators.
    pub fn new(
        store: Arc<dyn AppStore>,
        driver: Arc<dyn RuntimeDriver>,
        routes: Arc<dyn RouteDirectory>,
    ) -> Self {
        Self {
            store,
            driver,
            routes,
            builds: Arc::new(BuildCoordinator::new()),
            route_gate: Arc::new(Mutex::new(())),
            build_timeout: DEFAULT_BUILD_TIMEOUT,
        }
    }

    /// Set the upper bound for a background build.
    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = timeout;
        self
    }

    /// State store.
    pub fn store(&self) -> &Arc<dyn AppStore> {
        &self.store
    }

    /// Runtime driver.
    pub fn driver(&self) -> &Arc<dyn RuntimeDriver> {
        &self.driver
    }

    /// Route directory.
    pub fn routes(&self) -> &Arc<dyn RouteDirectory> {
        &self.routes
    }

    /// Build coordinator.
    pub fn builds(&self) -> &Arc<BuildCoordinator> {
        &self.builds
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Validate and persist a new app, then build it in the background.
    pub async fn create(&self, request: &AppRequest) -> Result<Provisioning> {
        let spec = request.validate()?;
        let app = self.store.create_app(&spec).await?;
        info!(app_id = app.id, app_name = %app.app_name, "App created");

        let task = self.spawn_build(app.clone(), None);
        Ok(Provisioning { app, task })
    }

    /// Validate and persist new configuration, then rebuild in the background.
    ///
    /// The record is `pending` by the time this returns.
    pub async fn update(&self, id: AppId, request: &AppRequest) -> Result<Provisioning> {
        let spec = request.validate()?;
        let previous = self
            .store
            .get_app(id)
            .await?
            .ok_or(Error::AppNotFound(id))?;
        let app = self
            .store
            .update_app(id, &spec)
            .await?
            .ok_or(Error::AppNotFound(id))?;
        info!(app_id = id, app_name = %app.app_name, "App updated");

        let task = self.spawn_build(app.clone(), Some(previous));
        Ok(Provisioning { app, task })
    }

    /// Tear down an app and delete its record.
    ///
    /// Route and container teardown are best effort; only a failure to
    /// delete the record is returned. An in-flight build is cancelled under
    /// the route gate, so a route install already underway finishes before the
    /// route is removed and a later one never starts.
    pub async fn delete(&self, id: AppId) -> Result<()> {
        let app = self
            .store
            .get_app(id)
            .await?
            .ok_or(Error::AppNotFound(id))?;

        {
            let _gate = self.route_gate.lock().await;
            if let Err(e) = self.routes.remove_route(&app.app_name).await {
                warn!(app_id = id, app_name = %app.app_name, error = %e, "Failed to remove route during delete");
            }
            if self.builds.clear(id) {
                info!(app_id = id, "Cancelled in-flight build for deleted app");
            }
        }

        if let Err(e) = self.driver.stop(id).await {
            warn!(app_id = id, error = %e, "Failed to stop container during delete");
        }
        if let Err(e) = self.driver.remove(id).await {
            warn!(app_id = id, error = %e, "Failed to remove container during delete");
        }

        if !self.store.delete_app(id).await? {
            return Err(Error::AppNotFound(id));
        }
        info!(app_id = id, app_name = %app.app_name, "App deleted");
        Ok(())
    }

    /// Start an app's container, rebuilding it if it no longer exists.
    pub async fn start(&self, id: AppId) -> Result<StartOutcome> {
        let app = self
            .store
            .get_app(id)
            .await?
            .ok_or(Error::AppNotFound(id))?;

        match self.driver.status(id).await {
            ContainerStatus::NotFound => Ok(self.recreate(app).await),
            ContainerStatus::Running => Ok(StartOutcome::AlreadyRunning),
            status => {
                debug!(app_id = id, ?status, "Starting existing container");
                match self.driver.start(id).await {
                    Ok(()) => {
                        info!(app_id = id, "Container started");
                        Ok(StartOutcome::Started)
                    }
                    Err(DriverError::NotFound(_)) => Ok(self.recreate(app).await),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// Stop an app's container. Status, route and record are untouched.
    pub async fn stop(&self, id: AppId) -> Result<()> {
        self.driver.stop(id).await?;
        info!(app_id = id, "Container stopped");
        Ok(())
    }

    async fn recreate(&self, mut app: App) -> StartOutcome {
        info!(app_id = app.id, app_name = %app.app_name, "Container missing, recreating");
        if let Err(e) = self.store.update_status(app.id, AppStatus::Pending).await {
            warn!(app_id = app.id, error = %e, "Failed to mark app pending");
        }
        app.status = AppStatus::Pending;
        StartOutcome::Creating(self.spawn_build(app, None))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// An app with its live container status.
    pub async fn get(&self, id: AppId) -> Result<App> {
        let mut app = self
            .store
            .get_app(id)
            .await?
            .ok_or(Error::AppNotFound(id))?;
        app.container_status = Some(self.driver.status(id).await);
        Ok(app)
    }

    /// All apps with their live container status, newest first.
    pub async fn list(&self) -> Result<Vec<App>> {
        let mut apps = self.store.list_apps().await?;
        for app in &mut apps {
            app.container_status = Some(self.driver.status(app.id).await);
        }
        Ok(apps)
    }

    /// Tail of an app's container logs.
    pub async fn logs(&self, id: AppId, tail: usize) -> Result<String> {
        Ok(self.driver.logs(id, tail).await?)
    }

    /// Tail of the host service's logs.
    pub async fn host_logs(&self, tail: usize) -> Result<String> {
        Ok(self.driver.host_logs(tail).await?)
    }

    /// Whether the state store is reachable.
    pub async fn store_healthy(&self) -> bool {
        match self.store.health_check().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "State store health check failed");
                false
            }
        }
    }

    // ========================================================================
    // Background builds
    // ========================================================================

    /// Register a build for `app` and run it detached.
    ///
    /// Registration happens before spawning, so the most recently submitted
    /// build is the one that stays current.
    fn spawn_build(&self, app: App, previous: Option<App>) -> JoinHandle<BuildOutcome> {
        let lease = self
            .builds
            .register_and_supersede(app.id, CancellationToken::new());
        let this = self.clone();
        tokio::spawn(async move { this.provision(app, previous, lease).await })
    }

    async fn provision(&self, app: App, previous: Option<App>, lease: BuildLease) -> BuildOutcome {
        let token = lease.token().clone();

        let outcome = match tokio::time::timeout(
            self.build_timeout,
            self.provision_steps(&app, previous.as_ref(), &token),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => BuildOutcome::Failed(FailureCause::TimedOut),
        };

        // A newer build or a delete owns the record now
        let outcome = if token.is_cancelled() {
            BuildOutcome::Superseded
        } else {
            outcome
        };

        match &outcome {
            BuildOutcome::Active => {
                self.write_status(app.id, AppStatus::Active).await;
                info!(app_id = app.id, app_name = %app.app_name, "App active");
            }
            BuildOutcome::Failed(cause) => {
                error!(app_id = app.id, app_name = %app.app_name, cause = %cause, "App build failed");
                self.write_status(app.id, AppStatus::Failed).await;
            }
            BuildOutcome::Superseded => {
                info!(app_id = app.id, app_name = %app.app_name, "Build superseded");
            }
        }

        drop(lease);
        outcome
    }

    async fn provision_steps(
        &self,
        app: &App,
        previous: Option<&App>,
        token: &CancellationToken,
    ) -> BuildOutcome {
        if previous.is_some() {
            match until_cancelled(token, self.teardown_container(app.id)).await {
                Some(()) => {}
                None => return BuildOutcome::Superseded,
            }
        }

        let spec = match BuildSpec::for_app(app) {
            Ok(spec) => spec,
            Err(e) => return BuildOutcome::Failed(FailureCause::Render(e.to_string())),
        };

        info!(app_id = app.id, app_name = %app.app_name, driver = self.driver.driver_type(), "Building app");
        let artifact = match until_cancelled(token, self.driver.build(&spec)).await {
            None => return BuildOutcome::Superseded,
            Some(Err(e)) => return BuildOutcome::Failed(FailureCause::Build(e.to_string())),
            Some(Ok(artifact)) => artifact,
        };

        match until_cancelled(token, self.driver.run(&artifact)).await {
            None => return BuildOutcome::Superseded,
            Some(Err(e)) => return BuildOutcome::Failed(FailureCause::Build(e.to_string())),
            Some(Ok(())) => {}
        }

        if token.is_cancelled() {
            return BuildOutcome::Superseded;
        }

        let sync = route_sync(app, previous);
        if matches!(sync, RouteSync::Skip) {
            debug!(app_id = app.id, "Route unchanged, skipping route sync");
            return BuildOutcome::Active;
        }

        let _gate = self.route_gate.lock().await;
        if token.is_cancelled() {
            return BuildOutcome::Superseded;
        }

        let route = RouteSpec::for_app(app);
        match sync {
            RouteSync::Skip => {}
            RouteSync::Install => {
                if let Err(e) = self.routes.add_route(&route).await {
                    return BuildOutcome::Failed(FailureCause::Route(e.to_string()));
                }
            }
            RouteSync::Rename { previous_name } => {
                if let Err(e) = self.routes.add_route(&route).await {
                    return BuildOutcome::Failed(FailureCause::Route(e.to_string()));
                }
                if let Err(e) = self.routes.remove_route(&previous_name).await {
                    warn!(app_id = app.id, previous_name = %previous_name, error = %e, "Failed to remove route for previous name");
                }
            }
        }

        BuildOutcome::Active
    }

    /// Stop and remove the previous container before a rebuild.
    async fn teardown_container(&self, id: AppId) {
        if let Err(e) = self.driver.stop(id).await {
            warn!(app_id = id, error = %e, "Failed to stop previous container");
        }
        if let Err(e) = self.driver.remove(id).await {
            warn!(app_id = id, error = %e, "Failed to remove previous container");
        }
    }

    async fn write_status(&self, id: AppId, status: AppStatus) {
        if let Err(e) = self.store.update_status(id, status).await {
            error!(app_id = id, status = %status, error = %e, "Failed to update app status");
        }
    }
}

/// Decide what the route step must do for a build of `app`.
///
/// A rebuild leaves the route alone only when nothing routing-relevant changed
/// and the previous build got its route installed.
fn route_sync(app: &App, previous: Option<&App>) -> RouteSync {
    match previous {
        None => RouteSync::Install,
        Some(prev) if prev.app_name != app.app_name => RouteSync::Rename {
            previous_name: prev.app_name.clone(),
        },
        Some(prev) if prev.route_changed(app) || prev.status != AppStatus::Active => {
            RouteSync::Install
        }
        Some(_) => RouteSync::Skip,
    }
}

async fn until_cancelled<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}
