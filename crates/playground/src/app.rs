// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! App data model and request validation.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::template::{self, TemplateError, TemplateVars};

/// App identifier, assigned by the store.
pub type AppId = i64;

/// Names that collide with service paths.
pub const RESERVED_NAMES: &[&str] = &["_app", "_shell", "health"];

static APP_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("valid regex"));

/// Container name for an app, derived from its id.
pub fn container_name(id: AppId) -> String {
    format!("app-{}", id)
}

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status persisted with the app.
///
/// Describes whether the last build and route sync succeeded, not whether the
/// container is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    /// Build or route sync in progress
    Pending,
    /// Container built and route installed
    Active,
    /// Last build or route sync failed
    Failed,
}

impl AppStatus {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Pending => "pending",
            AppStatus::Active => "active",
            AppStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AppStatus::Pending),
            "active" => Ok(AppStatus::Active),
            "failed" => Ok(AppStatus::Failed),
            other => Err(format!("unknown app status: {}", other)),
        }
    }
}

/// Live container state, queried on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    /// Container is running
    Running,
    /// Container exists but is not running
    Exited,
    /// No container with this name
    NotFound,
    /// The runtime could not be asked
    Unknown,
}

impl ContainerStatus {
    /// Map a docker `State.Status` string.
    pub fn from_docker_state(state: &str) -> Self {
        match state.trim() {
            "running" | "restarting" => ContainerStatus::Running,
            "created" | "exited" | "paused" | "dead" | "removing" => ContainerStatus::Exited,
            _ => ContainerStatus::Unknown,
        }
    }
}

// ============================================================================
// Optional features
// ============================================================================

/// Optional devcontainer capabilities an app can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptionalFeature {
    /// Workbench CLI with Java, AWS and Google Cloud tooling
    #[serde(rename = "wb")]
    Wb,
    /// Local workbench-tools devcontainer feature
    #[serde(rename = "workbench-tools")]
    WorkbenchTools,
}

impl OptionalFeature {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionalFeature::Wb => "wb",
            OptionalFeature::WorkbenchTools => "workbench-tools",
        }
    }
}

impl FromStr for OptionalFeature {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wb" => Ok(OptionalFeature::Wb),
            "workbench-tools" => Ok(OptionalFeature::WorkbenchTools),
            other => Err(ValidationError::new(format!(
                "invalid optional feature '{}': must be one of wb, workbench-tools",
                other
            ))),
        }
    }
}

// ============================================================================
// App
// ============================================================================

/// A declared app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    /// Store-assigned identifier
    pub id: AppId,
    /// Unique name, also the proxy path segment
    pub app_name: String,
    /// Owning user
    pub username: String,
    /// Home directory inside the container
    pub user_home_directory: String,
    /// Build recipe template
    pub dockerfile: String,
    /// Port the app listens on
    pub port: u16,
    /// Requested devcontainer features
    pub optional_features: Vec<OptionalFeature>,
    /// Routing template
    pub caddy_config: String,
    /// Lifecycle status
    pub status: AppStatus,
    /// Live container state, only set on read paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_status: Option<ContainerStatus>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl App {
    /// Container name for this app.
    pub fn container_name(&self) -> String {
        container_name(self.id)
    }

    /// Template variables for this app.
    pub fn template_vars(&self) -> TemplateVars {
        TemplateVars {
            app_name: self.app_name.clone(),
            container_name: self.container_name(),
            port: self.port,
        }
    }

    /// Whether a change to `next` needs the proxy route rewritten.
    pub fn route_changed(&self, next: &App) -> bool {
        self.app_name != next.app_name
            || self.port != next.port
            || self.caddy_config != next.caddy_config
    }
}

/// Response body for listing apps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppList {
    /// Apps, newest first
    pub apps: Vec<App>,
    /// Number of apps
    pub total: usize,
}

// ============================================================================
// Requests
// ============================================================================

/// Create or update request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppRequest {
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub user_home_directory: String,
    #[serde(default)]
    pub dockerfile: Option<String>,
    #[serde(default)]
    pub docker_image: Option<String>,
    #[serde(default)]
    pub port: i64,
    #[serde(default)]
    pub optional_features: Vec<String>,
    #[serde(default)]
    pub caddy_config: String,
}

/// A validated and normalized app declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSpec {
    pub app_name: String,
    pub username: String,
    pub user_home_directory: String,
    /// Build recipe; a `docker_image` request is stored as `FROM <image>`
    pub dockerfile: String,
    pub port: u16,
    pub optional_features: Vec<OptionalFeature>,
    pub caddy_config: String,
}

/// A request failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    /// Create a validation error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<TemplateError> for ValidationError {
    fn from(e: TemplateError) -> Self {
        ValidationError::new(e.to_string())
    }
}

impl AppRequest {
    /// Validate and normalize the request.
    ///
    /// Runs every check before anything is persisted, including rendering both
    /// templates against placeholder variables.
    pub fn validate(&self) -> Result<AppSpec, ValidationError> {
        let app_name = validate_app_name(&self.app_name)?;

        let username = required("username", &self.username)?;
        let user_home_directory = required("user_home_directory", &self.user_home_directory)?;
        let caddy_config = required("caddy_config", &self.caddy_config)?;

        let port = u16::try_from(self.port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| ValidationError::new("port must be between 1 and 65535"))?;

        let dockerfile = self.build_recipe()?;

        let mut optional_features = self
            .optional_features
            .iter()
            .map(|f| f.parse::<OptionalFeature>())
            .collect::<Result<Vec<_>, _>>()?;
        optional_features.sort();
        optional_features.dedup();

        template::validate("dockerfile", &dockerfile)?;
        template::validate("caddy_config", &caddy_config)?;

        Ok(AppSpec {
            app_name,
            username,
            user_home_directory,
            dockerfile,
            port,
            optional_features,
            caddy_config,
        })
    }

    fn build_recipe(&self) -> Result<String, ValidationError> {
        let dockerfile = self.dockerfile.as_deref().filter(|s| !s.trim().is_empty());
        let image = self
            .docker_image
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match (dockerfile, image) {
            (Some(_), Some(_)) => Err(ValidationError::new(
                "only one of dockerfile or docker_image may be set",
            )),
            (None, None) => Err(ValidationError::new(
                "one of dockerfile or docker_image is required",
            )),
            (Some(dockerfile), None) => Ok(dockerfile.to_string()),
            (None, Some(image)) => {
                if image.chars().any(char::is_whitespace) {
                    return Err(ValidationError::new(
                        "docker_image must be a single image reference",
                    ));
                }
                Ok(format!("FROM {}", image))
            }
        }
    }
}

fn validate_app_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationError::new("app_name is required"));
    }
    if !APP_NAME_PATTERN.is_match(name) {
        return Err(ValidationError::new(
            "app_name may only contain letters, digits, hyphens and underscores",
        ));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(ValidationError::new(format!(
            "app_name '{}' is reserved",
            name
        )));
    }
    Ok(name.to_string())
}

fn required(field: &str, value: &str) -> Result<String, ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::new(format!("{} is required", field)))
    } else {
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_request() -> AppRequest {
        AppRequest {
            app_name: "demo".to_string(),
            username: "u".to_string(),
            user_home_directory: "/home/u".to_string(),
            dockerfile: Some("FROM alpine".to_string()),
            docker_image: None,
            port: 8080,
            optional_features: vec![],
            caddy_config: "reverse_proxy {{.ContainerName}}:{{.Port}}".to_string(),
        }
    }

    #[test]
    fn test_valid_request() {
        let spec = demo_request().validate().unwrap();
        assert_eq!(spec.app_name, "demo");
        assert_eq!(spec.dockerfile, "FROM alpine");
        assert_eq!(spec.port, 8080);
        assert!(spec.optional_features.is_empty());
    }

    #[test]
    fn test_app_name_is_trimmed() {
        let mut req = demo_request();
        req.app_name = "  demo-2_x  ".to_string();
        assert_eq!(req.validate().unwrap().app_name, "demo-2_x");
    }

    #[test]
    fn test_app_name_rejects_bad_characters() {
        for name in ["de mo", "demo/x", "démo", "a.b", ""] {
            let mut req = demo_request();
            req.app_name = name.to_string();
            assert!(req.validate().is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn test_app_name_rejects_reserved() {
        for name in RESERVED_NAMES {
            let mut req = demo_request();
            req.app_name = name.to_string();
            let err = req.validate().unwrap_err();
            assert!(err.message().contains("reserved"));
        }
    }

    #[test]
    fn test_port_bounds() {
        for port in [0, -1, 65536, 100_000] {
            let mut req = demo_request();
            req.port = port;
            assert!(req.validate().is_err(), "port {port} should be rejected");
        }
        for port in [1, 65535] {
            let mut req = demo_request();
            req.port = port;
            assert_eq!(req.validate().unwrap().port as i64, port);
        }
    }

    #[test]
    fn test_docker_image_normalized_to_recipe() {
        let mut req = demo_request();
        req.dockerfile = None;
        req.docker_image = Some(" python:3.12-slim ".to_string());
        assert_eq!(req.validate().unwrap().dockerfile, "FROM python:3.12-slim");
    }

    #[test]
    fn test_both_build_specs_rejected() {
        let mut req = demo_request();
        req.docker_image = Some("alpine".to_string());
        let err = req.validate().unwrap_err();
        assert!(err.message().contains("only one"));
    }

    #[test]
    fn test_neither_build_spec_rejected() {
        let mut req = demo_request();
        req.dockerfile = Some("   ".to_string());
        let err = req.validate().unwrap_err();
        assert!(err.message().contains("required"));
    }

    #[test]
    fn test_image_with_whitespace_rejected() {
        let mut req = demo_request();
        req.dockerfile = None;
        req.docker_image = Some("alpine\nRUN rm -rf /".to_string());
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_features_parsed_and_deduplicated() {
        let mut req = demo_request();
        req.optional_features = vec![
            "workbench-tools".to_string(),
            "wb".to_string(),
            "wb".to_string(),
        ];
        assert_eq!(
            req.validate().unwrap().optional_features,
            vec![OptionalFeature::Wb, OptionalFeature::WorkbenchTools]
        );
    }

    #[test]
    fn test_unknown_feature_rejected() {
        let mut req = demo_request();
        req.optional_features = vec!["gpu".to_string()];
        let err = req.validate().unwrap_err();
        assert!(err.message().contains("gpu"));
    }

    #[test]
    fn test_required_fields() {
        let mut req = demo_request();
        req.username = " ".to_string();
        assert_eq!(req.validate().unwrap_err().message(), "username is required");

        let mut req = demo_request();
        req.user_home_directory = String::new();
        assert_eq!(
            req.validate().unwrap_err().message(),
            "user_home_directory is required"
        );

        let mut req = demo_request();
        req.caddy_config = String::new();
        assert_eq!(req.validate().unwrap_err().message(), "caddy_config is required");
    }

    #[test]
    fn test_malformed_templates_rejected() {
        let mut req = demo_request();
        req.caddy_config = "reverse_proxy {{.Upstream}}".to_string();
        assert!(req.validate().unwrap_err().message().contains("caddy_config"));

        let mut req = demo_request();
        req.dockerfile = Some("FROM {{ .AppName".to_string());
        assert!(req.validate().unwrap_err().message().contains("dockerfile"));
    }

    #[test]
    fn test_container_status_from_docker_state() {
        assert_eq!(ContainerStatus::from_docker_state("running\n"), ContainerStatus::Running);
        assert_eq!(ContainerStatus::from_docker_state("exited"), ContainerStatus::Exited);
        assert_eq!(ContainerStatus::from_docker_state("created"), ContainerStatus::Exited);
        assert_eq!(ContainerStatus::from_docker_state("weird"), ContainerStatus::Unknown);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [AppStatus::Pending, AppStatus::Active, AppStatus::Failed] {
            assert_eq!(status.as_str().parse::<AppStatus>().unwrap(), status);
        }
        assert!("running".parse::<AppStatus>().is_err());
    }

    #[test]
    fn test_container_status_serializes_snake_case() {
        let json = serde_json::to_string(&ContainerStatus::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
    }
}
