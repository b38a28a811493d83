// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Devcontainer build contexts.
//!
//! Each app gets a directory under the apps base dir holding its Dockerfile,
//! `.devcontainer.json` and `docker-compose.yaml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::app::{AppId, OptionalFeature, container_name};
use crate::driver::{BuildSpec, Result};

/// Where the startup scripts are mounted inside app containers.
pub const STARTUP_SCRIPT_TARGET: &str = "/workspace/startupscript";

const WORKBENCH_TOOLS_FEATURE_REF: &str = "./.devcontainer/features/workbench-tools";

/// `.devcontainer.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevcontainerConfig {
    pub name: String,
    pub docker_compose_file: String,
    pub service: String,
    pub workspace_folder: String,
    pub features: BTreeMap<String, Value>,
    pub remote_user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_create_command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_start_command: Option<Vec<String>>,
}

/// Build context configuration
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Directory holding one context per app
    pub apps_base_dir: PathBuf,
    /// External docker network app containers join
    pub network: String,
    /// Cloud passed to workbench features
    pub cloud: String,
    /// Source of the workbench-tools feature
    pub workbench_tools_feature_path: PathBuf,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            apps_base_dir: PathBuf::from("/workspace/apps"),
            network: "playground_playground-apps".to_string(),
            cloud: "gcp".to_string(),
            workbench_tools_feature_path: PathBuf::from("/workspace/features/src/workbench-tools"),
        }
    }
}

/// Manages per-app build contexts on disk.
pub struct ContextManager {
    config: ContextConfig,
}

impl ContextManager {
    /// Create a new context manager.
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Context directory for an app.
    pub fn context_dir(&self, app_id: AppId) -> PathBuf {
        self.config.apps_base_dir.join(container_name(app_id))
    }

    /// Write the full build context for an app.
    ///
    /// Existing files are overwritten, so a rebuild picks up the new spec.
    pub fn prepare_context(&self, spec: &BuildSpec, startup_script_source: &str) -> Result<PathBuf> {
        let dir = self.context_dir(spec.app_id);
        fs::create_dir_all(&dir)?;

        fs::write(dir.join("Dockerfile"), &spec.dockerfile)?;

        if spec.optional_features.contains(&OptionalFeature::WorkbenchTools) {
            let dest = dir.join(".devcontainer").join("features").join("workbench-tools");
            if dest.exists() {
                fs::remove_dir_all(&dest)?;
            }
            copy_dir_all(&self.config.workbench_tools_feature_path, &dest)?;
        }

        let devcontainer = self.devcontainer_config(spec);
        fs::write(
            dir.join(".devcontainer.json"),
            serde_json::to_string_pretty(&devcontainer)?,
        )?;

        fs::write(
            dir.join("docker-compose.yaml"),
            self.compose_file(spec.app_id, startup_script_source),
        )?;

        Ok(dir)
    }

    /// Remove an app's context directory. A missing directory is fine.
    pub fn delete_context(&self, app_id: AppId) -> Result<()> {
        let dir = self.context_dir(app_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Build the `.devcontainer.json` for an app.
    pub fn devcontainer_config(&self, spec: &BuildSpec) -> DevcontainerConfig {
        let mut features = BTreeMap::new();
        let mut post_create_command = None;
        let mut post_start_command = None;

        if spec.optional_features.contains(&OptionalFeature::Wb) {
            features.insert(
                "ghcr.io/devcontainers/features/java:1".to_string(),
                json!({ "version": "17" }),
            );
            features.insert(
                "ghcr.io/devcontainers/features/aws-cli:1".to_string(),
                json!({}),
            );
            features.insert(
                "ghcr.io/dhoeric/features/google-cloud-cli:1".to_string(),
                json!({}),
            );

            let script_args = |script: &str| {
                vec![
                    format!("{}/{}", STARTUP_SCRIPT_TARGET, script),
                    spec.username.clone(),
                    spec.user_home_directory.clone(),
                    self.config.cloud.clone(),
                    "true".to_string(),
                ]
            };
            post_create_command = Some(script_args("post-startup.sh"));
            post_start_command = Some(script_args("remount-on-restart.sh"));
        }

        if spec.optional_features.contains(&OptionalFeature::WorkbenchTools) {
            features.insert(
                WORKBENCH_TOOLS_FEATURE_REF.to_string(),
                json!({
                    "cloud": self.config.cloud,
                    "username": spec.username,
                    "userHomeDir": spec.user_home_directory,
                }),
            );
        }

        DevcontainerConfig {
            name: spec.app_name.clone(),
            docker_compose_file: "docker-compose.yaml".to_string(),
            service: "app".to_string(),
            workspace_folder: spec.user_home_directory.clone(),
            features,
            remote_user: "root".to_string(),
            post_create_command,
            post_start_command,
        }
    }

    /// Build the `docker-compose.yaml` for an app.
    pub fn compose_file(&self, app_id: AppId, startup_script_source: &str) -> String {
        format!(
            r#"services:
  app:
    platform: linux/amd64
    build:
      context: .
      dockerfile: Dockerfile
    container_name: {container}
    networks:
      - {network}
    cap_add:
      - SYS_ADMIN
    devices:
      - /dev/fuse
    security_opt:
      - apparmor:unconfined
    volumes:
      - {source}:{target}:ro

networks:
  {network}:
    external: true
"#,
            container = container_name(app_id),
            network = self.config.network,
            source = startup_script_source,
            target = STARTUP_SCRIPT_TARGET,
        )
    }
}

fn copy_dir_all(src: &Path, dest: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(base: &Path, feature_src: &Path) -> ContextManager {
        ContextManager::new(ContextConfig {
            apps_base_dir: base.to_path_buf(),
            network: "apps-net".to_string(),
            cloud: "aws".to_string(),
            workbench_tools_feature_path: feature_src.to_path_buf(),
        })
    }

    fn spec(features: Vec<OptionalFeature>) -> BuildSpec {
        BuildSpec {
            app_id: 12,
            app_name: "demo".to_string(),
            username: "alice".to_string(),
            user_home_directory: "/home/alice".to_string(),
            dockerfile: "FROM alpine\n".to_string(),
            optional_features: features,
        }
    }

    #[test]
    fn test_prepare_context_writes_files() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(temp.path(), &temp.path().join("missing"));

        let dir = mgr.prepare_context(&spec(vec![]), "/host/startup").unwrap();
        assert_eq!(dir, temp.path().join("app-12"));

        let dockerfile = fs::read_to_string(dir.join("Dockerfile")).unwrap();
        assert_eq!(dockerfile, "FROM alpine\n");

        let compose = fs::read_to_string(dir.join("docker-compose.yaml")).unwrap();
        assert!(compose.contains("container_name: app-12"));
        assert!(compose.contains("- /host/startup:/workspace/startupscript:ro"));
        assert!(compose.contains("  apps-net:\n    external: true"));

        let devcontainer: Value =
            serde_json::from_str(&fs::read_to_string(dir.join(".devcontainer.json")).unwrap())
                .unwrap();
        assert_eq!(devcontainer["name"], "demo");
        assert_eq!(devcontainer["dockerComposeFile"], "docker-compose.yaml");
        assert_eq!(devcontainer["service"], "app");
        assert_eq!(devcontainer["workspaceFolder"], "/home/alice");
        assert_eq!(devcontainer["remoteUser"], "root");
        assert_eq!(devcontainer["features"], json!({}));
        assert!(devcontainer.get("postCreateCommand").is_none());
    }

    #[test]
    fn test_wb_feature_adds_tooling_and_commands() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(temp.path(), temp.path());

        let config = mgr.devcontainer_config(&spec(vec![OptionalFeature::Wb]));

        assert_eq!(config.features.len(), 3);
        assert_eq!(
            config.features["ghcr.io/devcontainers/features/java:1"],
            json!({ "version": "17" })
        );
        assert_eq!(
            config.post_create_command.unwrap(),
            vec![
                "/workspace/startupscript/post-startup.sh",
                "alice",
                "/home/alice",
                "aws",
                "true"
            ]
        );
        assert_eq!(
            config.post_start_command.unwrap()[0],
            "/workspace/startupscript/remount-on-restart.sh"
        );
    }

    #[test]
    fn test_workbench_tools_feature_is_copied() {
        let temp = TempDir::new().unwrap();
        let feature_src = temp.path().join("feature-src");
        fs::create_dir_all(feature_src.join("scripts")).unwrap();
        fs::write(feature_src.join("devcontainer-feature.json"), "{}").unwrap();
        fs::write(feature_src.join("scripts").join("install.sh"), "#!/bin/sh").unwrap();

        let base = temp.path().join("apps");
        let mgr = manager(&base, &feature_src);
        let dir = mgr
            .prepare_context(&spec(vec![OptionalFeature::WorkbenchTools]), "/s")
            .unwrap();

        let copied = dir.join(".devcontainer/features/workbench-tools");
        assert!(copied.join("devcontainer-feature.json").exists());
        assert!(copied.join("scripts/install.sh").exists());

        let devcontainer: Value =
            serde_json::from_str(&fs::read_to_string(dir.join(".devcontainer.json")).unwrap())
                .unwrap();
        assert_eq!(
            devcontainer["features"][WORKBENCH_TOOLS_FEATURE_REF],
            json!({ "cloud": "aws", "username": "alice", "userHomeDir": "/home/alice" })
        );

        // A second build replaces the copy
        mgr.prepare_context(&spec(vec![OptionalFeature::WorkbenchTools]), "/s")
            .unwrap();
        assert!(copied.join("scripts/install.sh").exists());
    }

    #[test]
    fn test_delete_context_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(temp.path(), temp.path());

        let dir = mgr.prepare_context(&spec(vec![]), "/s").unwrap();
        assert!(dir.exists());

        mgr.delete_context(12).unwrap();
        assert!(!dir.exists());
        mgr.delete_context(12).unwrap();
    }
}
