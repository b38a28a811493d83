// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime driver trait definitions.
//!
//! Defines the abstract interface to the container runtime.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::app::{App, AppId, ContainerStatus, OptionalFeature, container_name};
use crate::template::{self, TemplateError};

/// Errors from driver operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// No container exists for the app.
    #[error("Container not found: {0}")]
    NotFound(String),

    /// Build or first start failed.
    #[error("Build failed: {0}")]
    BuildFailed(String),

    /// A runtime CLI exited unsuccessfully.
    #[error("{command} failed with exit code {exit_code:?}: {stderr}")]
    CommandFailed {
        /// Command line that failed.
        command: String,
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Standard error output.
        stderr: String,
    },

    /// Build recipe could not be rendered.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Everything needed to build an app's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    /// App ID
    pub app_id: AppId,
    /// App name
    pub app_name: String,
    /// Owning user
    pub username: String,
    /// Home directory, used as the workspace folder
    pub user_home_directory: String,
    /// Rendered Dockerfile
    pub dockerfile: String,
    /// Requested features
    pub optional_features: Vec<OptionalFeature>,
}

impl BuildSpec {
    /// Render the app's build recipe into a build spec.
    pub fn for_app(app: &App) -> std::result::Result<Self, TemplateError> {
        let dockerfile = template::render("dockerfile", &app.dockerfile, &app.template_vars())?;
        Ok(Self {
            app_id: app.id,
            app_name: app.app_name.clone(),
            username: app.username.clone(),
            user_home_directory: app.user_home_directory.clone(),
            dockerfile,
            optional_features: app.optional_features.clone(),
        })
    }

    /// Container name for the app being built.
    pub fn container_name(&self) -> String {
        container_name(self.app_id)
    }
}

/// Result of a successful build, consumed by [`RuntimeDriver::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// App ID
    pub app_id: AppId,
    /// Container the artifact runs as
    pub container_name: String,
    /// On-disk build context, if the driver keeps one
    pub context_dir: Option<PathBuf>,
}

/// Trait for container runtimes.
///
/// Every operation is keyed by app identity; the container name is derived
/// from it. Drivers do NOT access the database.
#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Driver type identifier (e.g., "docker", "mock")
    fn driver_type(&self) -> &'static str;

    /// Build the app's image and prepare its container.
    async fn build(&self, spec: &BuildSpec) -> Result<Artifact>;

    /// Create and start the container for a built artifact.
    async fn run(&self, artifact: &Artifact) -> Result<()>;

    /// Start an existing container.
    ///
    /// Returns [`DriverError::NotFound`] when the container does not exist.
    async fn start(&self, app_id: AppId) -> Result<()>;

    /// Stop the container. Stopping a stopped or missing container succeeds.
    async fn stop(&self, app_id: AppId) -> Result<()>;

    /// Remove the container and its build context. Idempotent.
    async fn remove(&self, app_id: AppId) -> Result<()>;

    /// Current container status. Never fails; an unreachable runtime
    /// reports [`ContainerStatus::Unknown`].
    async fn status(&self, app_id: AppId) -> ContainerStatus;

    /// Last `tail` lines of the container's logs.
    async fn logs(&self, app_id: AppId, tail: usize) -> Result<String>;

    /// Last `tail` lines of the host service's own logs.
    async fn host_logs(&self, tail: usize) -> Result<String>;

    /// Check that the runtime is reachable.
    async fn health_check(&self) -> Result<()>;
}
