// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker driver.
//!
//! Builds apps with the devcontainer CLI and manages their containers with
//! the docker CLI.

use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::context::{ContextConfig, ContextManager, STARTUP_SCRIPT_TARGET};
use crate::app::{AppId, ContainerStatus, container_name};
use crate::config::Config;
use crate::driver::traits::*;

/// Docker driver configuration
#[derive(Debug, Clone)]
pub struct DockerDriverConfig {
    /// Build context configuration
    pub context: ContextConfig,
    /// Container this service runs in
    pub host_container: String,
    /// Explicit startup-script mount source
    pub startup_script_source: Option<String>,
    /// docker binary
    pub docker_bin: String,
    /// devcontainer binary
    pub devcontainer_bin: String,
}

impl Default for DockerDriverConfig {
    fn default() -> Self {
        Self {
            context: ContextConfig::default(),
            host_container: "playground".to_string(),
            startup_script_source: None,
            docker_bin: "docker".to_string(),
            devcontainer_bin: "devcontainer".to_string(),
        }
    }
}

impl DockerDriverConfig {
    /// Derive driver configuration from the service configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            context: ContextConfig {
                apps_base_dir: config.apps_base_dir.clone(),
                network: config.apps_network.clone(),
                cloud: config.cloud.clone(),
                workbench_tools_feature_path: config.workbench_tools_feature_path.clone(),
            },
            host_container: config.host_container.clone(),
            startup_script_source: config.startup_script_source.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MountInfo {
    #[serde(default)]
    source: String,
    #[serde(default)]
    destination: String,
}

/// Container driver using the docker and devcontainer CLIs.
pub struct DockerDriver {
    config: DockerDriverConfig,
    contexts: ContextManager,
    startup_script_source: OnceCell<String>,
}

impl DockerDriver {
    /// Create a new docker driver.
    pub fn new(config: DockerDriverConfig) -> Self {
        let contexts = ContextManager::new(config.context.clone());
        Self {
            config,
            contexts,
            startup_script_source: OnceCell::new(),
        }
    }

    /// Context directory for an app.
    pub fn context_dir(&self, app_id: AppId) -> PathBuf {
        self.contexts.context_dir(app_id)
    }

    /// Run a docker subcommand, returning its output whatever the exit status.
    async fn docker(&self, args: &[&str]) -> Result<Output> {
        debug!(args = ?args, "Running docker");
        Ok(Command::new(&self.config.docker_bin)
            .args(args)
            .output()
            .await?)
    }

    /// Run a docker subcommand that must succeed.
    async fn docker_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.docker(args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(command_failed(&self.config.docker_bin, args, &output))
        }
    }

    /// Run a devcontainer subcommand against a context directory.
    async fn devcontainer(&self, subcommand: &str, dir: &str) -> Result<()> {
        let args = [subcommand, "--workspace-folder", dir];
        info!(command = subcommand, workspace = dir, "Running devcontainer");

        let output = Command::new(&self.config.devcontainer_bin)
            .args(args)
            .current_dir(dir)
            .output()
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(command_failed(&self.config.devcontainer_bin, &args, &output))
        }
    }

    /// Host path mounted at the startup-script directory of the host container.
    async fn startup_script_source(&self) -> Result<String> {
        if let Some(source) = &self.config.startup_script_source {
            return Ok(source.clone());
        }

        self.startup_script_source
            .get_or_try_init(|| async {
                let output = self
                    .docker_checked(&[
                        "inspect",
                        "-f",
                        "{{json .Mounts}}",
                        &self.config.host_container,
                    ])
                    .await?;
                let mounts: Vec<MountInfo> = serde_json::from_slice(&output.stdout)?;
                mounts
                    .into_iter()
                    .find(|m| m.destination == STARTUP_SCRIPT_TARGET)
                    .map(|m| m.source)
                    .ok_or_else(|| {
                        DriverError::Other(format!(
                            "no mount at {} on container {}",
                            STARTUP_SCRIPT_TARGET, self.config.host_container
                        ))
                    })
            })
            .await
            .cloned()
    }

    async fn container_logs(&self, name: &str, tail: usize) -> Result<String> {
        let tail = tail.to_string();
        let output = self.docker(&["logs", "--tail", &tail, name]).await?;
        if !output.status.success() {
            if is_no_such_container(&output) {
                return Err(DriverError::NotFound(name.to_string()));
            }
            return Err(command_failed(
                &self.config.docker_bin,
                &["logs", "--tail", &tail, name],
                &output,
            ));
        }

        // docker logs replays the container's stdout and stderr on the matching streams
        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }
}

#[async_trait]
impl RuntimeDriver for DockerDriver {
    fn driver_type(&self) -> &'static str {
        "docker"
    }

    async fn build(&self, spec: &BuildSpec) -> Result<Artifact> {
        let startup_script_source = self.startup_script_source().await?;
        let dir = self
            .contexts
            .prepare_context(spec, &startup_script_source)?;
        let dir_str = dir.to_string_lossy().into_owned();

        info!(app_id = spec.app_id, dir = %dir_str, "Building devcontainer");
        self.devcontainer("build", &dir_str)
            .await
            .map_err(|e| DriverError::BuildFailed(e.to_string()))?;

        Ok(Artifact {
            app_id: spec.app_id,
            container_name: spec.container_name(),
            context_dir: Some(dir),
        })
    }

    async fn run(&self, artifact: &Artifact) -> Result<()> {
        let dir = artifact
            .context_dir
            .clone()
            .unwrap_or_else(|| self.contexts.context_dir(artifact.app_id));
        let dir_str = dir.to_string_lossy().into_owned();

        info!(app_id = artifact.app_id, container = %artifact.container_name, "Starting devcontainer");
        self.devcontainer("up", &dir_str)
            .await
            .map_err(|e| DriverError::BuildFailed(e.to_string()))
    }

    async fn start(&self, app_id: AppId) -> Result<()> {
        let name = container_name(app_id);
        let output = self.docker(&["start", &name]).await?;
        if output.status.success() {
            info!(container = %name, "Container started");
            Ok(())
        } else if is_no_such_container(&output) {
            Err(DriverError::NotFound(name))
        } else {
            Err(command_failed(&self.config.docker_bin, &["start", &name], &output))
        }
    }

    async fn stop(&self, app_id: AppId) -> Result<()> {
        let name = container_name(app_id);
        let output = self.docker(&["stop", &name]).await?;
        if output.status.success() || is_no_such_container(&output) {
            debug!(container = %name, "Container stopped");
            Ok(())
        } else {
            Err(command_failed(&self.config.docker_bin, &["stop", &name], &output))
        }
    }

    async fn remove(&self, app_id: AppId) -> Result<()> {
        let name = container_name(app_id);
        let output = self.docker(&["rm", "-f", &name]).await?;
        if !output.status.success() && !is_no_such_container(&output) {
            return Err(command_failed(&self.config.docker_bin, &["rm", "-f", &name], &output));
        }

        self.contexts.delete_context(app_id)?;
        info!(container = %name, "Container and build context removed");
        Ok(())
    }

    async fn status(&self, app_id: AppId) -> ContainerStatus {
        let name = container_name(app_id);
        match self
            .docker(&["inspect", "-f", "{{.State.Status}}", &name])
            .await
        {
            Ok(output) if output.status.success() => {
                ContainerStatus::from_docker_state(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(_) => ContainerStatus::NotFound,
            Err(e) => {
                warn!(container = %name, error = %e, "Failed to inspect container");
                ContainerStatus::Unknown
            }
        }
    }

    async fn logs(&self, app_id: AppId, tail: usize) -> Result<String> {
        self.container_logs(&container_name(app_id), tail).await
    }

    async fn host_logs(&self, tail: usize) -> Result<String> {
        self.container_logs(&self.config.host_container, tail).await
    }

    async fn health_check(&self) -> Result<()> {
        self.docker_checked(&["info", "--format", "{{.ServerVersion}}"])
            .await
            .map(|_| ())
    }
}

fn is_no_such_container(output: &Output) -> bool {
    String::from_utf8_lossy(&output.stderr).contains("No such container")
}

fn command_failed(bin: &str, args: &[&str], output: &Output) -> DriverError {
    DriverError::CommandFailed {
        command: format!("{} {}", bin, args.join(" ")),
        exit_code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}
